//! CLI command definitions

use clap::{Parser, Subcommand};

/// Career Advisor - turns a conversation about your interests into career paths
#[derive(Debug, Parser)]
#[command(name = "advisor", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the JSON chat API
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat in the terminal until advice is produced
    Chat {
        /// Opening message; read from stdin when omitted
        #[arg(short, long)]
        message: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_with_message() {
        let cli = Cli::try_parse_from(["advisor", "chat", "-m", "I like coding"]).unwrap();
        match cli.command {
            Command::Chat { message } => assert_eq!(message.as_deref(), Some("I like coding")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_serve_with_port() {
        let cli = Cli::try_parse_from(["advisor", "serve", "--port", "9090"]).unwrap();
        assert!(matches!(cli.command, Command::Serve { port: Some(9090) }));
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["advisor"]).is_err());
    }
}
