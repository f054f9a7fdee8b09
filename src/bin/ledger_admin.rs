use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use inventory_ledger::{
    config::{self, AppConfig},
    db::{self, ChainLockManager, DbPool},
    entities::tracked_entity::EntityType,
    models::{ChainKey, FuelStockKey, PartStockKey},
    services::{EntityDirectory, RegisterEntityRequest, StockLedger},
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Register(args) => handle_register(&context, args, cli.json).await?,
        Commands::Ledger(command) => match command.kind() {
            LedgerKind::Parts => {
                handle_ledger_command(&context.ledger::<PartStockKey>(), command, cli.json).await?
            }
            LedgerKind::Fuel => {
                handle_ledger_command(&context.ledger::<FuelStockKey>(), command, cli.json).await?
            }
        },
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "ledger-admin",
    about = "Operator tooling for the inventory ledger",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Register a warehouse or part so chain keys may reference it
    Register(RegisterArgs),
    #[command(flatten)]
    Ledger(LedgerCommands),
}

#[derive(Subcommand)]
enum LedgerCommands {
    /// Audit one chain key
    Audit(KeyArgs),
    /// Audit every chain key of a kind
    AuditAll {
        #[arg(long, value_enum, default_value_t = LedgerKind::Parts)]
        kind: LedgerKind,
    },
    /// Replay a chain key's history and repair stored balances
    Recalculate {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long, help = "Balance to start the replay from (default 0)")]
        initial_balance: Option<Decimal>,
    },
    /// Show the cached aggregate of a chain key
    Snapshot(KeyArgs),
    /// Show the newest movements of a chain key
    History {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
}

impl LedgerCommands {
    fn kind(&self) -> LedgerKind {
        match self {
            LedgerCommands::Audit(key) | LedgerCommands::Snapshot(key) => key.kind,
            LedgerCommands::Recalculate { key, .. } | LedgerCommands::History { key, .. } => {
                key.kind
            }
            LedgerCommands::AuditAll { kind } => *kind,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LedgerKind {
    Parts,
    Fuel,
}

#[derive(Args)]
struct KeyArgs {
    #[arg(long, value_enum, default_value_t = LedgerKind::Parts)]
    kind: LedgerKind,
    #[arg(long)]
    warehouse: Uuid,
    #[arg(long, help = "Part id (parts ledger only)")]
    part: Option<Uuid>,
}

impl KeyArgs {
    fn chain_key<K: ChainKey>(&self) -> Result<K> {
        K::from_parts(self.warehouse, self.part).ok_or_else(|| {
            anyhow!(
                "--warehouse/--part do not describe a {} key",
                K::KIND.as_str()
            )
        })
    }
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(long = "type", value_enum)]
    entity_type: EntityKindArg,
    #[arg(long)]
    name: String,
    #[arg(long, help = "Use this id instead of generating one")]
    id: Option<Uuid>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EntityKindArg {
    Warehouse,
    Part,
}

impl From<EntityKindArg> for EntityType {
    fn from(kind: EntityKindArg) -> Self {
        match kind {
            EntityKindArg::Warehouse => EntityType::Warehouse,
            EntityKindArg::Part => EntityType::Part,
        }
    }
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    locks: Arc<ChainLockManager>,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        let locks = Arc::new(ChainLockManager::new(config.ledger.lock_timeout()));

        Ok(Self {
            db: Arc::new(db_pool),
            locks,
            config,
        })
    }

    fn ledger<K: ChainKey>(&self) -> StockLedger<K> {
        StockLedger::new(self.db.clone(), self.locks.clone(), self.config.ledger.clone())
    }
}

async fn handle_register(context: &CliContext, args: RegisterArgs, json: bool) -> Result<()> {
    let directory = EntityDirectory::new(context.db.clone());
    let entity = directory
        .register(RegisterEntityRequest {
            id: args.id,
            entity_type: args.entity_type.into(),
            name: args.name,
        })
        .await
        .context("failed to register entity")?;

    if json {
        print_json(&entity)?;
    } else {
        println!(
            "Registered {} '{}' with id {}",
            entity.entity_type.as_str(),
            entity.name,
            entity.id
        );
    }
    Ok(())
}

async fn handle_ledger_command<K: ChainKey>(
    ledger: &StockLedger<K>,
    command: LedgerCommands,
    json: bool,
) -> Result<()> {
    match command {
        LedgerCommands::Audit(args) => {
            let report = ledger.audit(&args.chain_key::<K>()?).await?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "{} • {} • stored {} • chain {} • calculated {} • breaks {}",
                    report.chain_key,
                    report.status.as_str(),
                    report.stored_quantity,
                    report.chain_quantity,
                    report.calculated_quantity,
                    report.chain_breaks
                );
                for recommendation in &report.recommendations {
                    println!("  - {}", recommendation);
                }
            }
        }
        LedgerCommands::AuditAll { .. } => {
            let reports = ledger.audit_all().await?;
            if json {
                print_json(&reports)?;
            } else {
                for report in &reports {
                    println!(
                        "- {} • {} • drift {} • breaks {}",
                        report.chain_key,
                        report.status.as_str(),
                        report.discrepancy_stored_vs_calculated,
                        report.chain_breaks
                    );
                }
                let unhealthy = reports.iter().filter(|r| !r.is_healthy()).count();
                println!("{} chain(s) audited, {} unhealthy", reports.len(), unhealthy);
            }
        }
        LedgerCommands::Recalculate {
            key,
            initial_balance,
        } => {
            let outcome = ledger
                .recalculate(&key.chain_key::<K>()?, initial_balance)
                .await;
            if json {
                print_json(&outcome)?;
            } else if outcome.success {
                println!(
                    "Recalculated {}: {} movement(s), {} correction(s), final balance {}",
                    outcome.chain_key,
                    outcome.transactions_processed,
                    outcome.corrections_made,
                    outcome.final_balance.unwrap_or_default()
                );
            }
            if !outcome.success {
                return Err(anyhow!(
                    "recalculation of {} failed{}: {}",
                    outcome.chain_key,
                    if outcome.retryable { " (retryable)" } else { "" },
                    outcome.error.unwrap_or_default()
                ));
            }
        }
        LedgerCommands::Snapshot(args) => {
            let snapshot = ledger.aggregate(&args.chain_key::<K>()?).await?;
            if json {
                print_json(&snapshot)?;
            } else {
                println!(
                    "{} • on hand {} • reserved {} • available {} • avg cost {} • value {}",
                    snapshot.chain_key,
                    snapshot.current_quantity,
                    snapshot.reserved_quantity,
                    snapshot.available_quantity,
                    snapshot.average_unit_cost,
                    snapshot.total_value
                );
            }
        }
        LedgerCommands::History { key, page, limit } => {
            let (movements, total) = ledger
                .movements(&key.chain_key::<K>()?, page, limit)
                .await?;
            if json {
                print_json(&serde_json::json!({ "movements": movements, "total": total }))?;
            } else {
                for m in &movements {
                    println!(
                        "#{} {} {} {} → {} ({})",
                        m.sequence,
                        m.movement_date.to_rfc3339(),
                        m.movement_type.as_str(),
                        m.quantity,
                        m.current_balance,
                        m.id
                    );
                }
                println!("{} of {} movement(s)", movements.len(), total);
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rust_decimal_macros::dec;

    const WAREHOUSE: &str = "6f1c2a8e-4b1d-4a7e-9d3f-2c5b8e7a1f00";
    const PART: &str = "0b9e4d2c-7a6f-4e1b-8c3d-5f2a9e6b7c11";

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ledger-admin").chain(args.iter().copied()))
            .unwrap_or_else(|e| panic!("{:?} should parse: {}", args, e))
    }

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn recalculate_takes_key_and_opening_balance() {
        let cli = parse(&[
            "recalculate",
            "--kind",
            "fuel",
            "--warehouse",
            WAREHOUSE,
            "--initial-balance",
            "1000.5",
            "--json",
        ]);
        assert!(cli.json);
        let Commands::Ledger(command) = cli.command else {
            panic!("expected a ledger command");
        };
        assert_eq!(command.kind(), LedgerKind::Fuel);
        let LedgerCommands::Recalculate {
            key,
            initial_balance,
        } = command
        else {
            panic!("expected recalculate");
        };
        assert_eq!(initial_balance, Some(dec!(1000.5)));
        let fuel: FuelStockKey = key.chain_key().unwrap();
        assert_eq!(fuel.warehouse_id, WAREHOUSE.parse::<Uuid>().unwrap());
    }

    #[test]
    fn parts_key_needs_a_part_id() {
        let cli = parse(&["snapshot", "--warehouse", WAREHOUSE]);
        let Commands::Ledger(LedgerCommands::Snapshot(key)) = cli.command else {
            panic!("expected snapshot");
        };
        assert_eq!(key.kind, LedgerKind::Parts);
        assert!(key.chain_key::<PartStockKey>().is_err());

        let cli = parse(&["history", "--warehouse", WAREHOUSE, "--part", PART, "--limit", "5"]);
        let Commands::Ledger(LedgerCommands::History { key, page, limit }) = cli.command else {
            panic!("expected history");
        };
        assert_eq!((page, limit), (1, 5));
        let part: PartStockKey = key.chain_key().unwrap();
        assert_eq!(part.part_id, PART.parse::<Uuid>().unwrap());
    }

    #[test]
    fn register_maps_entity_type() {
        let cli = parse(&["register", "--type", "part", "--name", "Fuel Filter"]);
        let Commands::Register(args) = cli.command else {
            panic!("expected register");
        };
        assert_eq!(EntityType::from(args.entity_type), EntityType::Part);
        assert_eq!(args.name, "Fuel Filter");
        assert_eq!(args.id, None);
    }

    #[test]
    fn migrate_and_audit_all_parse() {
        assert!(matches!(parse(&["migrate"]).command, Commands::Migrate));
        let cli = parse(&["audit-all", "--kind", "fuel"]);
        assert!(matches!(
            cli.command,
            Commands::Ledger(LedgerCommands::AuditAll {
                kind: LedgerKind::Fuel
            })
        ));
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let bad: [&[&str]; 4] = [
            &["audit"],
            &["audit", "--warehouse", "not-a-uuid"],
            &["recalculate", "--warehouse", WAREHOUSE, "--initial-balance", "lots"],
            &["register", "--type", "depot", "--name", "X"],
        ];
        for args in bad {
            assert!(
                Cli::try_parse_from(std::iter::once("ledger-admin").chain(args.iter().copied()))
                    .is_err(),
                "{:?} should be rejected",
                args
            );
        }
    }
}
