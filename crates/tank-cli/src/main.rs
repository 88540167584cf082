use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::blocking::{Client, Response};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tank_core::{
    FieldMask, FilterSpec, ListRequest, Operator, Pagination, Record, RecordService, System,
    Table, Tank,
};
use tokio::runtime::Runtime;

#[derive(Parser)]
#[command(name = "tank", version, about = "Tank record service CLI", long_about = None)]
struct Cli {
    /// Data directory for local embedded mode
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Start the HTTP server instead of running a command
    #[arg(long)]
    serve: bool,

    /// Target server URL; without it commands run against --data-dir
    #[arg(long, env = "TANK_URL")]
    server_url: Option<String>,

    /// Address to bind when serving (default `0.0.0.0:$PORT`, port 10000)
    #[arg(long)]
    listen: Option<String>,

    /// Which records to operate on
    #[arg(long, value_enum, default_value_t = Kind::Tank)]
    kind: Kind,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Kind {
    Tank,
    System,
}

impl Kind {
    fn path(self) -> &'static str {
        match self {
            Kind::Tank => "tanks",
            Kind::System => "systems",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List records matching every filter
    List {
        /// key<op>value with op one of = > >= < <= ~ (contains)
        #[arg(long)]
        filter: Vec<String>,
        /// 0 or less means no limit
        #[arg(long, default_value_t = 0)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Fetch one record by key
    Get { key: String },
    /// Create a record from JSON
    Create {
        #[arg(long)]
        json: String,
    },
    /// Overwrite the masked fields of a record
    Update {
        key: String,
        #[arg(long)]
        json: String,
        #[arg(long, value_delimiter = ',')]
        mask: Vec<String>,
    },
    /// Delete a record (succeeds if it is already gone)
    Delete { key: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.serve {
        std::env::set_var("TANK_DATA", cli.data_dir.to_string_lossy().to_string());
        if let Some(listen) = cli.listen {
            std::env::set_var("TANK_LISTEN", listen);
        }
        // hand off to server main
        let rt = Runtime::new()?;
        return rt.block_on(tank_server::serve());
    }

    let Some(command) = cli.command else {
        bail!("no command given; see --help");
    };

    // network mode
    if let Some(base_url) = cli.server_url.as_deref() {
        let client = Client::builder().user_agent("tank-cli").build()?;
        return run_net(&client, base_url.trim_end_matches('/'), cli.kind, command);
    }

    // embedded mode
    match cli.kind {
        Kind::Tank => run_local::<Tank>(&cli.data_dir, command),
        Kind::System => run_local::<System>(&cli.data_dir, command),
    }
}

fn list_request(filters: &[String], limit: i64, offset: i64) -> Result<ListRequest> {
    Ok(ListRequest {
        filters: filters
            .iter()
            .map(|f| parse_filter(f))
            .collect::<Result<_>>()?,
        pagination: Some(Pagination::new(limit, offset)),
    })
}

/// Parse `key<op>value`. The value is sent as text; the service coerces it.
fn parse_filter(raw: &str) -> Result<FilterSpec> {
    let Some(at) = raw.find(['=', '<', '>', '~']) else {
        bail!("filter '{raw}' has no operator (use = > >= < <= ~)");
    };
    let key = raw[..at].trim();
    if key.is_empty() {
        bail!("filter '{raw}' has no key");
    }
    let rest = &raw[at..];
    let (operator, len) = if rest.starts_with(">=") {
        (Operator::GreaterEq, 2)
    } else if rest.starts_with("<=") {
        (Operator::SmallerEq, 2)
    } else if rest.starts_with('>') {
        (Operator::Greater, 1)
    } else if rest.starts_with('<') {
        (Operator::Smaller, 1)
    } else if rest.starts_with('~') {
        (Operator::Contains, 1)
    } else {
        (Operator::Eq, 1)
    };
    Ok(FilterSpec::new(key, operator, rest[len..].trim()))
}

/// Keys are typed per schema: `7` is a tank number, `alpha` a system name.
fn parse_key<K: DeserializeOwned>(raw: &str) -> Result<K> {
    serde_json::from_str(raw)
        .or_else(|_| serde_json::from_value(Value::String(raw.to_string())))
        .with_context(|| format!("'{raw}' is not a valid key"))
}

fn run_local<R: Record>(data_dir: &Path, command: Commands) -> Result<()> {
    let table = Arc::new(Table::<R>::open(data_dir)?);
    let service: RecordService<R, Table<R>> = RecordService::new(table.clone());
    match command {
        Commands::List {
            filter,
            limit,
            offset,
        } => {
            let request = list_request(&filter, limit, offset)?;
            let mut rows: Vec<R> = Vec::new();
            service.list(&request, &mut rows)?;
            for row in rows {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
        Commands::Get { key } => {
            let record = service.get(&parse_key::<R::Key>(&key)?)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Create { json } => {
            let record: R = serde_json::from_str(&json)?;
            service.create(record)?;
            println!("created");
        }
        Commands::Update { key, json, mask } => {
            let partial: R = serde_json::from_str(&json)?;
            let key = parse_key::<R::Key>(&key)?;
            let merged = service.update(&key, &partial, &FieldMask::new(mask))?;
            println!("{}", serde_json::to_string_pretty(&merged)?);
        }
        Commands::Delete { key } => {
            service.delete(&parse_key::<R::Key>(&key)?)?;
            println!("deleted");
        }
    }
    table.flush_wal()?;
    Ok(())
}

/// `{base_url}/v1/{kind}[/{segment}]` with the segment percent-encoded.
fn record_url(base_url: &str, kind: Kind, segment: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(base_url).with_context(|| format!("bad server url {base_url}"))?;
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| anyhow::anyhow!("server url {base_url} cannot take a path"))?;
        path.pop_if_empty().extend(["v1", kind.path()]);
        if let Some(segment) = segment {
            path.push(segment);
        }
    }
    Ok(url)
}

fn run_net(client: &Client, base_url: &str, kind: Kind, command: Commands) -> Result<()> {
    let keyed = |key: &str| record_url(base_url, kind, Some(key));
    match command {
        Commands::List {
            filter,
            limit,
            offset,
        } => {
            let request = list_request(&filter, limit, offset)?;
            let resp = checked(client.post(keyed("list")?).json(&request).send()?)?;
            // one JSON record per line
            for line in resp.text()?.lines().filter(|l| !l.is_empty()) {
                println!("{line}");
            }
        }
        Commands::Get { key } => {
            let resp = checked(client.get(keyed(&key)?).send()?)?;
            let record: Value = resp.json()?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Create { json } => {
            let record: Value = serde_json::from_str(&json)?;
            checked(client.post(record_url(base_url, kind, None)?).json(&record).send()?)?;
            println!("created");
        }
        Commands::Update { key, json, mask } => {
            let record: Value = serde_json::from_str(&json)?;
            let body = json!({ "record": record, "mask": mask });
            checked(client.patch(keyed(&key)?).json(&body).send()?)?;
            println!("updated");
        }
        Commands::Delete { key } => {
            checked(client.delete(keyed(&key)?).send()?)?;
            println!("deleted");
        }
    }
    Ok(())
}

fn checked(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().unwrap_or_default();
    match serde_json::from_str::<Value>(&text) {
        Ok(err) => bail!(
            "{} ({status}): {}",
            err["code"].as_str().unwrap_or("UNKNOWN"),
            err["message"].as_str().unwrap_or_default()
        ),
        Err(_) => bail!("server error {status}: {text}"),
    }
}
