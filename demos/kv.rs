//! A tiny persistent key/value database built on the journal.
//!
//! Every `set` or `del` is appended as a `set` event addressed to the key;
//! the `Pair` aggregate holds the latest value. On start the journal file is
//! replayed, so values survive restarts.
//!
//! Run with:
//!
//! ```text
//! cargo run --example kv -- set greeting hello
//! cargo run --example kv -- get greeting
//! cargo run --example kv -- del greeting
//! cargo run --example kv -- list
//! ```
//!
//! The journal lives at `$EVENTFOLD_JOURNAL` (default `kv-journal.jsonl`).
//! Set `RUST_LOG=debug` to watch entries being applied.

use std::sync::Arc;

use eventfold_journal::{
    Aggregate, Event, Guid, Journal, MemoryStore, Repository, TransitionError,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Pair aggregate
// ---------------------------------------------------------------------------

/// The current value of one key. `None` once deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Pair {
    value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload")]
enum PairEvent {
    #[serde(rename = "set")]
    Set { value: Option<String> },
}

impl Aggregate for Pair {
    const AGGREGATE_TYPE: &'static str = "pair";
    const TOPICS: &'static [&'static str] = &["set"];

    type DomainEvent = PairEvent;

    fn apply(mut self, _: &Guid, _: u64, event: &PairEvent) -> Result<Self, TransitionError> {
        match event {
            PairEvent::Set { value } => self.value = value.clone(),
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn set(
    journal: &Journal,
    key: &str,
    value: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = Event::from_domain(key, &PairEvent::Set { value })?.encode()?;
    let index = journal.append(payload)?;
    println!("ok ({index})");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path = std::env::var("EVENTFOLD_JOURNAL").unwrap_or_else(|_| "kv-journal.jsonl".into());
    let journal = Journal::builder().file(&path).open()?;
    let pairs: Arc<Repository<Pair>> = Arc::new(Repository::new(MemoryStore::new()));
    journal.subscribe(pairs.clone());
    journal.replay()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["set", key, value] => set(&journal, key, Some((*value).to_owned()))?,
        ["del", key] => set(&journal, key, None)?,
        ["get", key] => match pairs.get_by_guid(&Guid::from(*key)) {
            Ok(Pair { value: Some(value) }) => println!("{value}"),
            _ => println!("not found"),
        },
        ["list"] => {
            for projected in pairs.all()? {
                if let Some(value) = projected.state.value {
                    println!("{}={value}", projected.guid);
                }
            }
        }
        _ => {
            eprintln!("usage: kv set <key> <value> | get <key> | del <key> | list");
            std::process::exit(2);
        }
    }

    Ok(())
}
