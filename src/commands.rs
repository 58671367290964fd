use tracing::{error, info};

use crate::status::StatusReporter;
use crate::store::keywords::normalize;
use crate::store::{AddOutcome, KeywordStore, RemoveOutcome};

/// Commands understood by the bot, with their menu descriptions
pub const COMMAND_MENU: &[(&str, &str)] = &[
    ("check_status", "Scanner liveness and recent errors"),
    ("view_keywords", "List the current keywords"),
    ("add_keyword", "Add a keyword: /add_keyword xiaomi"),
    ("remove_keyword", "Remove a keyword: /remove_keyword xiaomi"),
    ("reset_keywords", "Remove every keyword"),
    ("help", "Show available commands"),
];

/// A parsed command; keyword arguments are `None` when missing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    CheckStatus,
    ViewKeywords,
    AddKeyword(Option<String>),
    RemoveKeyword(Option<String>),
    ResetKeywords,
}

impl Command {
    /// Parse `/name[@bot] [argument]`.
    ///
    /// Returns `None` for plain text, unknown commands and commands addressed
    /// to a different bot.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let text = text.trim().strip_prefix('/')?;
        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };

        let name = match head.split_once('@') {
            Some((name, target)) => {
                let ours = bot_username.is_some_and(|me| me.eq_ignore_ascii_case(target));
                if !ours {
                    return None;
                }
                name
            }
            None => head,
        };

        let argument = if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        };

        match name {
            "start" | "help" => Some(Command::Help),
            "check_status" => Some(Command::CheckStatus),
            "view_keywords" => Some(Command::ViewKeywords),
            "add_keyword" => Some(Command::AddKeyword(argument)),
            "remove_keyword" => Some(Command::RemoveKeyword(argument)),
            "reset_keywords" => Some(Command::ResetKeywords),
            _ => None,
        }
    }
}

/// Answers commands against the keyword store and the status view
pub struct CommandHandler {
    keywords: KeywordStore,
    status: StatusReporter,
}

impl CommandHandler {
    pub fn new(keywords: KeywordStore, status: StatusReporter) -> Self {
        Self { keywords, status }
    }

    /// Produce the reply text. Never fails: store errors become a readable sentence.
    pub async fn handle(&self, command: Command) -> String {
        match command {
            Command::Help => help_text(),
            Command::CheckStatus => self.status.report().await,
            Command::ViewKeywords => self.view_keywords().await,
            Command::AddKeyword(Some(raw)) if normalize(&raw).is_some() => {
                self.add_keyword(&raw).await
            }
            Command::AddKeyword(_) => {
                "Please provide a single-line keyword to add. Example: /add_keyword xiaomi"
                    .to_string()
            }
            Command::RemoveKeyword(Some(raw)) if normalize(&raw).is_some() => {
                self.remove_keyword(&raw).await
            }
            Command::RemoveKeyword(_) => {
                "Please provide a single-line keyword to remove. Example: /remove_keyword xiaomi"
                    .to_string()
            }
            Command::ResetKeywords => match self.keywords.reset().await {
                Ok(()) => {
                    info!("Keyword list reset");
                    "All keywords have been reset. The list is now empty.".to_string()
                }
                Err(e) => store_failure(e),
            },
        }
    }

    async fn view_keywords(&self) -> String {
        match self.keywords.load().await {
            Ok(keywords) if keywords.is_empty() => {
                "No keywords have been added yet. Use /add_keyword to add a new keyword."
                    .to_string()
            }
            Ok(keywords) => {
                let mut reply = String::from("📌 Current Keywords:");
                for keyword in &keywords {
                    reply.push_str(&format!("\n- {}", keyword));
                }
                reply
            }
            Err(e) => store_failure(e),
        }
    }

    async fn add_keyword(&self, raw: &str) -> String {
        match self.keywords.add(raw).await {
            Ok(AddOutcome::Added(keyword)) => {
                info!("Keyword added: {}", keyword);
                format!("Keyword '{}' has been added.", keyword)
            }
            Ok(AddOutcome::AlreadyExists(keyword)) => {
                format!("The keyword '{}' already exists.", keyword)
            }
            Err(e) => store_failure(e),
        }
    }

    async fn remove_keyword(&self, raw: &str) -> String {
        match self.keywords.remove(raw).await {
            Ok(RemoveOutcome::Removed(keyword)) => {
                info!("Keyword removed: {}", keyword);
                format!("Keyword '{}' has been removed.", keyword)
            }
            Ok(RemoveOutcome::NotFound(keyword)) => {
                format!("The keyword '{}' does not exist.", keyword)
            }
            Err(e) => store_failure(e),
        }
    }
}

fn help_text() -> String {
    let mut text = String::from("I forward channel posts that match your keywords.\n\nCommands:");
    for (name, description) in COMMAND_MENU {
        text.push_str(&format!("\n/{} - {}", name, description));
    }
    text
}

fn store_failure(e: anyhow::Error) -> String {
    error!("Keyword store failure: {:#}", e);
    "Sorry, the keyword list is unavailable right now. Please try again later.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Heartbeat;
    use chrono::{Duration, Utc};
    use tokio::sync::watch;

    fn handler(dir: &tempfile::TempDir) -> CommandHandler {
        let (_tx, rx) = watch::channel(Heartbeat::new(Utc::now()));
        let status = StatusReporter::new(
            rx,
            dir.path().join("log"),
            Duration::hours(10),
            Duration::minutes(15),
        );
        CommandHandler::new(KeywordStore::new(dir.path().join("keywords.txt")), status)
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("/add_keyword  Xiaomi Mi ", None),
            Some(Command::AddKeyword(Some("Xiaomi Mi".to_string())))
        );
        assert_eq!(
            Command::parse("/add_keyword", None),
            Some(Command::AddKeyword(None))
        );
        assert_eq!(
            Command::parse("/remove_keyword   ", None),
            Some(Command::RemoveKeyword(None))
        );
        assert_eq!(Command::parse("/start", None), Some(Command::Help));
        assert_eq!(Command::parse("/view_keywords", None), Some(Command::ViewKeywords));
        assert_eq!(Command::parse("hello", None), None);
        assert_eq!(Command::parse("/unknown", None), None);
    }

    #[test]
    fn test_parse_addressed_commands() {
        assert_eq!(
            Command::parse("/check_status@FilterBot", Some("filterbot")),
            Some(Command::CheckStatus)
        );
        assert_eq!(Command::parse("/check_status@OtherBot", Some("filterbot")), None);
        assert_eq!(Command::parse("/reset_keywords@x", None), None);
    }

    #[tokio::test]
    async fn test_keyword_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(&dir);

        assert!(handler
            .handle(Command::ViewKeywords)
            .await
            .starts_with("No keywords have been added yet"));

        assert_eq!(
            handler.handle(Command::AddKeyword(Some("Pixel".into()))).await,
            "Keyword 'pixel' has been added."
        );
        assert_eq!(
            handler.handle(Command::AddKeyword(Some("pixel".into()))).await,
            "The keyword 'pixel' already exists."
        );
        handler.handle(Command::AddKeyword(Some("drone".into()))).await;
        assert_eq!(
            handler.handle(Command::ViewKeywords).await,
            "📌 Current Keywords:\n- pixel\n- drone"
        );

        assert_eq!(
            handler.handle(Command::RemoveKeyword(Some("camera".into()))).await,
            "The keyword 'camera' does not exist."
        );
        assert_eq!(
            handler.handle(Command::RemoveKeyword(Some("PIXEL".into()))).await,
            "Keyword 'pixel' has been removed."
        );

        assert_eq!(
            handler.handle(Command::ResetKeywords).await,
            "All keywords have been reset. The list is now empty."
        );
        assert!(handler
            .handle(Command::ViewKeywords)
            .await
            .starts_with("No keywords"));
    }

    #[tokio::test]
    async fn test_missing_argument_gives_usage() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(&dir);

        assert!(handler
            .handle(Command::AddKeyword(None))
            .await
            .contains("/add_keyword xiaomi"));
        assert!(handler
            .handle(Command::RemoveKeyword(None))
            .await
            .contains("/remove_keyword xiaomi"));
    }

    #[tokio::test]
    async fn test_multi_line_argument_gives_usage() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(&dir);
        handler.handle(Command::AddKeyword(Some("pixel".into()))).await;

        let command = Command::parse("/add_keyword drone\nsale", None).unwrap();
        assert!(handler.handle(command).await.contains("/add_keyword xiaomi"));
        let command = Command::parse("/remove_keyword drone\nsale", None).unwrap();
        assert!(handler.handle(command).await.contains("/remove_keyword xiaomi"));

        assert_eq!(
            handler.handle(Command::ViewKeywords).await,
            "📌 Current Keywords:\n- pixel"
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_human_readable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("keywords.txt")).unwrap();
        let handler = handler(&dir);

        let reply = handler.handle(Command::AddKeyword(Some("x".into()))).await;
        assert!(reply.starts_with("Sorry"), "{reply}");
    }

    #[tokio::test]
    async fn test_help_lists_every_command() {
        let dir = tempfile::tempdir().unwrap();
        let reply = handler(&dir).handle(Command::Help).await;
        for (name, _) in COMMAND_MENU {
            assert!(reply.contains(&format!("/{name}")));
        }
    }
}
