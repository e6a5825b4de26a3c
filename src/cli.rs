//! Interface de linha de comando do hireloop baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status, config,
//! candidates, applications, logs, info, backup, clear, apply) e flags globais
//! (--config, --data-dir, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hireloop::DataKind;

/// hireloop: candidaturas automáticas com orçamento diário e ritmo humano.
#[derive(Debug, Parser)]
#[command(name = "hireloop", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./hireloop.toml).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Sobrescreve o diretório de dados da configuração.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa uma rodada completa: descoberta, pontuação e candidaturas.
    /// Ctrl-C pede parada cooperativa.
    Run,

    /// Mostra contadores do orçamento e do histórico.
    Status {
        /// Emite JSON em vez de texto.
        #[arg(long)]
        json: bool,
    },

    /// Inspeciona ou altera a configuração.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Lista candidatos conhecidos.
    Candidates {
        /// Apenas candidatos ainda pendentes.
        #[arg(long)]
        pending: bool,
    },

    /// Lista os registros de candidatura.
    Applications,

    /// Mostra as entradas mais recentes do log de auditoria.
    Logs {
        #[arg(long, short = 'n', default_value_t = 50)]
        limit: usize,
    },

    /// Mostra tamanho e contagem de registros de cada repositório.
    Info {
        /// Emite JSON em vez de texto.
        #[arg(long)]
        json: bool,
    },

    /// Grava um snapshot de todos os repositórios e da configuração em backups/.
    Backup,

    /// Apaga um repositório: candidates, applications, logs ou all.
    Clear {
        kind: DataKind,

        /// Confirma a remoção sem perguntar.
        #[arg(long)]
        yes: bool,
    },

    /// Envia manualmente a candidatura para um candidato armazenado.
    Apply {
        candidate_id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Imprime a configuração efetiva (token mascarado).
    Show,
    /// Verifica se a configuração permite iniciar uma rodada.
    Validate,
    /// Grava um arquivo de configuração com os valores padrão.
    Init {
        /// Sobrescreve um arquivo existente.
        #[arg(long)]
        force: bool,
    },
    /// Registra o aceite dos termos de uso automatizado.
    Accept,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["hireloop", "run"]);
        assert!(matches!(cli.command, Command::Run));
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "hireloop",
            "--config",
            "custom.toml",
            "--data-dir",
            "/tmp/hl",
            "--verbose",
            "status",
            "--json",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/hl")));
        assert!(matches!(cli.command, Command::Status { json: true }));
    }

    #[test]
    fn cli_parses_clear_kind() {
        let cli = Cli::parse_from(["hireloop", "clear", "applications", "--yes"]);
        match cli.command {
            Command::Clear { kind, yes } => {
                assert_eq!(kind, DataKind::Applications);
                assert!(yes);
            }
            _ => panic!("expected Clear command"),
        }
        assert!(Cli::try_parse_from(["hireloop", "clear", "everything"]).is_err());
    }

    #[test]
    fn cli_parses_logs_limit() {
        let cli = Cli::parse_from(["hireloop", "logs", "-n", "5"]);
        assert!(matches!(cli.command, Command::Logs { limit: 5 }));
        let cli = Cli::parse_from(["hireloop", "logs"]);
        assert!(matches!(cli.command, Command::Logs { limit: 50 }));
    }

    #[test]
    fn cli_parses_config_actions() {
        let cli = Cli::parse_from(["hireloop", "config", "init", "--force"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
    }

    #[test]
    fn cli_parses_maintenance_commands() {
        let cli = Cli::parse_from(["hireloop", "backup"]);
        assert!(matches!(cli.command, Command::Backup));
        let cli = Cli::parse_from(["hireloop", "info", "--json"]);
        assert!(matches!(cli.command, Command::Info { json: true }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
