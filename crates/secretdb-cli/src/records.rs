use std::sync::Arc;

use color_eyre::Result;
use secretdb_core::records::{Record, RecordRepository};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

pub const EMPTY_HINT: &str = "No secrets stored. Add one with `secretdb add <value>`.";

pub async fn add<R: RecordRepository>(repo: &R, value: String) -> Result<i64> {
    Ok(repo.insert(value).await?)
}

pub async fn list<R: RecordRepository>(repo: &R, json: bool) -> Result<String> {
    let records = repo.list_all().await?;
    if json {
        return Ok(serde_json::to_string_pretty(&records)?);
    }
    Ok(render(&records))
}

pub async fn clear<R: RecordRepository>(repo: &R) -> Result<usize> {
    let before = repo.list_all().await?.len();
    repo.clear_all().await?;
    Ok(before)
}

pub fn render(records: &[Record]) -> String {
    if records.is_empty() {
        return EMPTY_HINT.to_string();
    }
    records
        .iter()
        .map(|r| format!("{:>4}  {}", r.id, r.value))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellAction {
    Insert(String),
    Clear,
    Quit,
    Skip,
}

/// Commands are matched on the trimmed line. Anything else is stored exactly as
/// typed; a leading `::` escapes a value that would otherwise read as a command.
pub fn parse_shell_line(line: &str) -> ShellAction {
    match line.trim() {
        "" => ShellAction::Skip,
        ":clear" => ShellAction::Clear,
        ":quit" | ":q" => ShellAction::Quit,
        _ => match line.strip_prefix("::") {
            Some(escaped) => ShellAction::Insert(format!(":{escaped}")),
            None => ShellAction::Insert(line.to_string()),
        },
    }
}

/// Drive the store from line-based input while a subscriber prints the list
/// after every change. Returns the number of lines applied.
/// Once input ends the printer task is aborted and the final list is printed
/// from the current snapshot.
pub async fn run_shell<R, I>(repo: Arc<R>, input: I) -> Result<usize>
where
    R: RecordRepository + 'static,
    I: AsyncBufRead + Unpin,
{
    let mut rx = repo.subscribe();
    println!("{}", render(&rx.borrow()));

    let printer = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let records = rx.borrow_and_update().clone();
            println!("---\n{}", render(&records));
        }
    });

    let mut applied = 0;
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        match parse_shell_line(&line) {
            ShellAction::Insert(value) => {
                let id = repo.insert(value).await?;
                debug!(id, "shell insert");
            }
            ShellAction::Clear => repo.clear_all().await?,
            ShellAction::Quit => break,
            ShellAction::Skip => continue,
        }
        applied += 1;
    }

    printer.abort();
    let _ = printer.await;
    println!("---\n{}", final_view(repo.as_ref()));
    Ok(applied)
}

/// The list as it stands once the shell stops.
pub fn final_view<R: RecordRepository>(repo: &R) -> String {
    render(&repo.subscribe().borrow())
}
