//! Slash-command parsing for chat input.

/// Commands understood by the chat, with their usage lines.
pub const COMMANDS: &[(&str, &str)] = &[
    ("/docs", "list the documents in the registry"),
    ("/upload", "start a guided upload of JSON content"),
    ("/search <scope> <query>", "search documents tagged with a scope"),
    ("/upload-raw <scope> <content>", "upload JSON content tagged with a scope"),
    ("/cancel", "cancel a pending upload"),
];

/// A parsed chat input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    /// Plain text for the language model.
    Message(String),
    Command(SlashCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Docs,
    Upload,
    Cancel,
    Search { scope: String, query: String },
    UploadRaw { scope: String, content: String },
    /// A known command with missing arguments.
    Usage(&'static str),
    Unknown(String),
}

/// Splits chat input into a message or a slash command.
pub fn parse(input: &str) -> ChatInput {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return ChatInput::Message(input.to_string());
    }

    let (name, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((n, r)) => (n, r.trim_start()),
        None => (trimmed, ""),
    };

    let cmd = match name {
        "/docs" => SlashCommand::Docs,
        "/upload" => SlashCommand::Upload,
        "/cancel" => SlashCommand::Cancel,
        "/search" => match split_scope(rest) {
            Some((scope, query)) => SlashCommand::Search {
                scope: scope.to_string(),
                query: query.to_string(),
            },
            None => SlashCommand::Usage("/search <scope> <query>"),
        },
        "/upload-raw" => match split_scope(rest) {
            Some((scope, content)) => SlashCommand::UploadRaw {
                scope: scope.to_string(),
                content: content.to_string(),
            },
            None => SlashCommand::Usage("/upload-raw <scope> <content>"),
        },
        other => SlashCommand::Unknown(other.to_string()),
    };
    ChatInput::Command(cmd)
}

fn split_scope(rest: &str) -> Option<(&str, &str)> {
    let (scope, tail) = rest.split_once(char::is_whitespace)?;
    let tail = tail.trim();
    if scope.is_empty() || tail.is_empty() {
        None
    } else {
        Some((scope, tail))
    }
}

/// The "command not recognized" reply, listing valid commands.
pub fn unknown_command_message(name: &str) -> String {
    let mut out = format!("Command not recognized: {}\nAvailable commands:", name);
    for (usage, help) in COMMANDS {
        out.push_str(&format!("\n  {}: {}", usage, help));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_message() {
        assert_eq!(parse("hello /docs"), ChatInput::Message("hello /docs".to_string()));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse("/docs"), ChatInput::Command(SlashCommand::Docs));
        assert_eq!(parse("  /upload  "), ChatInput::Command(SlashCommand::Upload));
        assert_eq!(parse("/cancel"), ChatInput::Command(SlashCommand::Cancel));
    }

    #[test]
    fn test_search_keeps_full_query() {
        assert_eq!(
            parse("/search vendas  metas do trimestre"),
            ChatInput::Command(SlashCommand::Search {
                scope: "vendas".to_string(),
                query: "metas do trimestre".to_string(),
            })
        );
        assert_eq!(
            parse("/search vendas"),
            ChatInput::Command(SlashCommand::Usage("/search <scope> <query>"))
        );
    }

    #[test]
    fn test_upload_raw_content_with_spaces() {
        match parse(r#"/upload-raw rh {"a": "b c"}"#) {
            ChatInput::Command(SlashCommand::UploadRaw { scope, content }) => {
                assert_eq!(scope, "rh");
                assert_eq!(content, r#"{"a": "b c"}"#);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_lists_commands() {
        assert_eq!(
            parse("/nope x"),
            ChatInput::Command(SlashCommand::Unknown("/nope".to_string()))
        );
        let msg = unknown_command_message("/nope");
        assert!(msg.contains("/nope"));
        for (usage, _) in COMMANDS {
            assert!(msg.contains(usage));
        }
    }
}
