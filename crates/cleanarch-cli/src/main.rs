//! Repository driver CLI
//!
//! Opens one of the storage backends and runs seed / list / count / get /
//! remove commands against the sample `Product` entity.

mod config;
mod product;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cleanarch_domain::{Entity, EntityKey, Filter, LimitOffset, ValidateEntity};
use cleanarch_persistence::{
    KvRepository, MockRepository, RedisStore, Repository, RepositorySession, SqlClient,
    SqlRepository,
};

use crate::config::{Backend, Config};
use crate::product::{NewProduct, Product};

#[derive(Parser, Debug)]
#[command(name = "cleanarch")]
#[command(about = "Drive the repository backends from the command line")]
struct Args {
    /// Storage backend (overrides CLEANARCH_BACKEND)
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Insert randomly generated products
    Seed {
        #[arg(short, long, default_value = "10")]
        count: usize,
    },

    /// List products as JSON lines
    List {
        /// Equality predicate, `field=value` (repeatable)
        #[arg(short = 'w', long = "where")]
        predicates: Vec<String>,

        /// Ordering expression, e.g. `-price,name`
        #[arg(short, long, allow_hyphen_values = true)]
        order_by: Option<String>,

        /// Page size; omit for no limit
        #[arg(short, long)]
        limit: Option<u64>,

        #[arg(long, default_value = "0")]
        offset: u64,
    },

    /// Count products
    Count {
        #[arg(short = 'w', long = "where")]
        predicates: Vec<String>,
    },

    /// Fetch one product by id, uuid or name
    Get { key: String },

    /// Delete products matching every predicate
    Remove {
        #[arg(short = 'w', long = "where", required = true)]
        predicates: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(config.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    let args = Args::parse();
    let backend = args.backend.unwrap_or(config.backend);
    info!(%backend, version = cleanarch_persistence::VERSION, "Starting repository driver");

    let output = match backend {
        Backend::Mock => {
            warn!("mock backend keeps data for this process only");
            execute(&MockRepository::<Product>::new(), args.command).await?
        }
        Backend::Redis => {
            let repo = KvRepository::<Product, RedisStore>::connect(&config.redis)
                .await
                .with_context(|| format!("connecting to {}", config.redis.url))?;
            execute(&repo, args.command).await?
        }
        Backend::Sqlite => {
            let client = SqlClient::open(config.sqlite.clone())
                .with_context(|| format!("opening {}", config.sqlite.path))?;
            let repo = SqlRepository::<Product>::new(Arc::new(client));
            repo.ensure_table()?;
            execute(&repo, args.command).await?
        }
    };

    for line in output {
        println!("{line}");
    }
    Ok(())
}

/// Run one command in its own session.
async fn execute<R: Repository<Product>>(repo: &R, command: Command) -> Result<Vec<Value>> {
    let mut session = repo.begin().await?;

    let output = match command {
        Command::Seed { count } => {
            let mut added = Vec::with_capacity(count);
            for _ in 0..count {
                let request = NewProduct::fake();
                request.validate_data(&())?;
                if let Some(existing) = session.get(EntityKey::Key(request.name.clone())).await? {
                    if let Err(err) = request.validate_entity(&existing, &()) {
                        warn!(name = %request.name, error = %err, "skipping product");
                        continue;
                    }
                }
                let product = session.add(request.into_product()).await?;
                added.push(json!({ "id": product.id, "uuid": product.uuid, "name": product.name }));
            }
            session.commit().await?;
            info!(count = added.len(), "seeded products");
            added
        }
        Command::List {
            predicates,
            order_by,
            limit,
            offset,
        } => {
            let mut filter = parse_filter(&predicates)?;
            if let Some(expr) = order_by {
                filter = filter.order_by(expr);
            }
            let page = LimitOffset::new(0, offset);
            let page = limit.map_or_else(|| page.inf(), |limit| LimitOffset { limit, ..page });
            session
                .list(page, Some(&filter))
                .await?
                .into_iter()
                .map(serde_json::to_value)
                .collect::<serde_json::Result<_>>()?
        }
        Command::Count { predicates } => {
            let filter = parse_filter(&predicates)?;
            vec![json!({ "count": session.count(Some(&filter)).await? })]
        }
        Command::Get { key } => {
            let key = key.parse::<i64>().map_or(EntityKey::Key(key), EntityKey::Id);
            vec![serde_json::to_value(session.get_required(key).await?)?]
        }
        Command::Remove { predicates } => {
            let filter = parse_filter(&predicates)?;
            let removed = session.remove(&filter).await?;
            session.commit().await?;
            vec![json!({ "removed": removed })]
        }
    };
    Ok(output)
}

/// Build an equality filter from `field=value` arguments.
fn parse_filter(predicates: &[String]) -> Result<Filter> {
    predicates.iter().try_fold(Filter::new(), |filter, raw| {
        let (field, value) = raw
            .split_once('=')
            .with_context(|| format!("expected field=value, got {raw}"))?;
        let field = field.trim().to_ascii_lowercase();
        let def = Product::field_def(&field)
            .with_context(|| format!("unknown product field: {field}"))?;
        let value = def
            .kind
            .parse(value)
            .with_context(|| format!("{field}: not a valid {}", def.kind))?;
        Ok(filter.eq(field, value))
    })
}
