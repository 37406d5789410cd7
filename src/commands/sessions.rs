//! Session inspection commands

use colored::Colorize;
use prettytable::{row, Table};

use crate::config::Config;
use crate::error::{Result, StreamTagsError};
use crate::session::{Session, SessionStore, SessionSummary};
use crate::timing::{format_link_timestamp, format_subtitle_timestamp};

/// Lists every stored session, oldest first.
pub async fn list_sessions(config: &Config) -> Result<()> {
    let store = SessionStore::new(config.sessions_dir());
    let summaries = store.list().await?;

    if summaries.is_empty() {
        println!(
            "No sessions recorded in {}",
            store.dir().display().to_string().cyan()
        );
        return Ok(());
    }

    println!("\nSessions in {}:\n", store.dir().display());
    summaries_table(&summaries).printstd();
    println!();
    Ok(())
}

/// Prints the tags of one stored session.
///
/// # Errors
///
/// Returns [`StreamTagsError::NoTagsFound`] when no record exists for `id`
pub async fn show_session(config: &Config, id: &str) -> Result<()> {
    let store = SessionStore::new(config.sessions_dir());
    let session = store
        .load(id)
        .await?
        .ok_or_else(|| StreamTagsError::NoTagsFound(id.to_string()))?;

    println!("\nSession {}\n", session.id().bold());
    println!("Started:        {}", session.start_time().to_rfc3339());
    println!("Delay:          {}s", session.delay_seconds());
    println!("Tags:           {}", session.tags().len());
    println!();

    if session.tags().is_empty() {
        println!("{}", "No tags recorded".yellow());
    } else {
        tags_table(&session).printstd();
    }
    println!();
    Ok(())
}

fn summaries_table(summaries: &[SessionSummary]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Stream", "Started", "Delay", "Tags"]);
    for summary in summaries {
        table.add_row(row![
            summary.id,
            summary.start_time.format("%Y-%m-%d %H:%M:%S UTC"),
            format!("{}s", summary.delay_seconds),
            summary.tag_count
        ]);
    }
    table
}

fn tags_table(session: &Session) -> Table {
    let mut table = Table::new();
    table.add_row(row!["#", "Link", "Subtitle", "Moderator", "Text"]);
    for (i, (offset, tag)) in session.timed_tags().enumerate() {
        table.add_row(row![
            i + 1,
            format_link_timestamp(offset),
            format_subtitle_timestamp(offset),
            tag.moderator_name(),
            tag.text()
        ]);
    }
    table
}
