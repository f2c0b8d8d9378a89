use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "secretdb",
    about = "Keep a short list of secrets in an encrypted local database",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Append a secret to the list.
    Add {
        /// Words are joined with single spaces.
        #[arg(required = true, num_args = 1..)]
        value: Vec<String>,
    },
    /// Print every stored secret, oldest first.
    List {
        /// Emit JSON instead of one line per record.
        #[arg(long)]
        json: bool,
    },
    /// Delete every stored secret.
    Clear,
    /// Interactive session: each line is appended, `:clear` empties the list, `:quit` exits.
    Shell,
    /// Check that the key can be loaded and the database opened.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_multiple_words() {
        let cli = Cli::try_parse_from(["secretdb", "add", "open", "sesame"])
            .expect("parse should succeed");
        assert_eq!(
            cli.command,
            Command::Add {
                value: vec!["open".into(), "sesame".into()]
            }
        );
    }

    #[test]
    fn add_requires_a_value() {
        assert!(Cli::try_parse_from(["secretdb", "add"]).is_err());
    }

    #[test]
    fn parses_list_json_flag() {
        let cli =
            Cli::try_parse_from(["secretdb", "list", "--json"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::List { json: true });
    }

    #[test]
    fn parses_clear_subcommand() {
        let cli = Cli::try_parse_from(["secretdb", "clear"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Clear);
    }

    #[test]
    fn parses_config_init_subcommand() {
        let cli =
            Cli::try_parse_from(["secretdb", "config", "init"]).expect("parse should succeed");
        assert_eq!(cli.command, Command::Config(ConfigCommand::Init));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["secretdb"]).is_err());
    }
}
