//! # CLI Command Implementations

use super::StoreLocation;
use crate::api;
use crate::config::Config;
use serde_json::{Value, json};
use weft_core::{HistoryLog, Request, Response, Session, Store, WeftError};

// =============================================================================
// SESSION LOADING
// =============================================================================

/// Open the store and wrap it in a session with the configured history
/// capacity.
pub fn open_session(location: &StoreLocation, config: &Config) -> Result<Session, WeftError> {
    let store = match location {
        StoreLocation::File(path) => Store::open(path)?,
        StoreLocation::Memory => Store::in_memory()?,
    };
    Ok(Session::with_history(
        store,
        HistoryLog::with_capacity(config.history.capacity),
    ))
}

fn print_json(value: &Value) -> Result<(), WeftError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| WeftError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

/// Print the body of a router response; a failed response becomes an error
/// after its body has been shown.
fn report(response: Response) -> Result<(), WeftError> {
    print_json(&response.body)?;
    if response.is_success() {
        Ok(())
    } else {
        Err(WeftError::InvalidRequest(format!(
            "request failed with status {} ({})",
            response.status,
            response.error_code().unwrap_or("unknown")
        )))
    }
}

fn count(session: &mut Session, path: &str) -> Result<usize, WeftError> {
    Ok(session.get(path)?.as_array().map_or(0, Vec::len))
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

pub async fn cmd_server(
    location: &StoreLocation,
    config: &Config,
    host: &str,
    port: u16,
) -> Result<(), WeftError> {
    let session = open_session(location, config)?;

    println!("Weft Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    match location {
        StoreLocation::File(path) => println!("  Database: {:?}", path),
        StoreLocation::Memory => println!("  Database: (in memory)"),
    }
    println!("  History:  {} entries", config.history.capacity);
    println!();
    println!("Endpoints:");
    println!("  GET  /health     - Health check");
    println!("  GET  /api/{{path}} - Read (projects, stamps, history, ...)");
    println!("  PUT  /api/{{path}} - Mutate; ?skip_history=true to not record");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, session, &config.security).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

pub fn cmd_status(
    location: &StoreLocation,
    config: &Config,
    json_mode: bool,
) -> Result<(), WeftError> {
    let mut session = open_session(location, config)?;
    let projects = count(&mut session, "/projects")?;
    let stamps = count(&mut session, "/stamps")?;
    let capacity = session.history().capacity();

    if json_mode {
        print_json(&json!({
            "projects": projects,
            "stamps": stamps,
            "history_capacity": capacity,
        }))
    } else {
        println!("Weft Status:");
        println!("  Projects:         {}", projects);
        println!("  Stamps:           {}", stamps);
        println!("  History capacity: {}", capacity);
        Ok(())
    }
}

// =============================================================================
// INIT COMMAND
// =============================================================================

pub fn cmd_init(location: &StoreLocation, force: bool) -> Result<(), WeftError> {
    let StoreLocation::File(path) = location else {
        println!("Nothing to initialize for an in-memory store");
        return Ok(());
    };

    if path.exists() {
        if !force {
            return Err(WeftError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(path)
            .map_err(|e| WeftError::IoError(format!("Remove {:?}: {}", path, e)))?;
    }

    Store::open(path)?;
    println!("Initialized new database at {:?}", path);
    Ok(())
}

// =============================================================================
// ONE-SHOT ROUTER COMMANDS
// =============================================================================

pub fn cmd_get(location: &StoreLocation, config: &Config, path: &str) -> Result<(), WeftError> {
    let mut session = open_session(location, config)?;
    report(session.handle(Request::get(path)))
}

pub fn cmd_put(
    location: &StoreLocation,
    config: &Config,
    path: &str,
    body: Option<&str>,
    skip_history: bool,
) -> Result<(), WeftError> {
    let body = match body {
        Some(text) => serde_json::from_str(text)
            .map_err(|e| WeftError::InvalidRequest(format!("Body is not valid JSON: {}", e)))?,
        None => Value::Null,
    };

    let mut session = open_session(location, config)?;
    let mut request = Request::put(path, body);
    if skip_history {
        request = request.skipping_history();
    }
    report(session.handle(request))
}

// =============================================================================
// COMPACT COMMAND
// =============================================================================

pub fn cmd_compact(location: &StoreLocation) -> Result<(), WeftError> {
    let StoreLocation::File(path) = location else {
        return Err(WeftError::InvalidRequest(
            "An in-memory store cannot be compacted".to_string(),
        ));
    };
    if !path.is_file() {
        return Err(WeftError::IoError(format!("No database at {:?}", path)));
    }

    let mut session = Session::open(path)?;
    session.store_mut().compact()?;
    println!("Compacted {:?}", path);
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempdir().expect("temp dir");
        let location = StoreLocation::File(temp.path().join("weft.redb"));

        cmd_init(&location, false).expect("first init");
        assert!(cmd_init(&location, false).is_err());
        cmd_init(&location, true).expect("forced init");
    }

    #[test]
    fn put_persists_across_sessions() {
        let temp = tempdir().expect("temp dir");
        let location = StoreLocation::File(temp.path().join("weft.redb"));
        let config = Config::default();

        cmd_put(&location, &config, "/projects", Some(r#"{"name":"p"}"#), false).expect("put");

        let mut session = open_session(&location, &config).expect("reopen");
        assert_eq!(count(&mut session, "/projects").expect("count"), 1);
    }

    #[test]
    fn failed_request_is_an_error() {
        let config = Config::default();
        let err = cmd_get(&StoreLocation::Memory, &config, "/projects/missing").expect_err("404");
        assert!(matches!(err, WeftError::InvalidRequest(_)));
    }

    #[test]
    fn malformed_put_body_is_rejected() {
        let config = Config::default();
        let err = cmd_put(&StoreLocation::Memory, &config, "/projects", Some("{"), false)
            .expect_err("bad json");
        assert!(matches!(err, WeftError::InvalidRequest(_)));
    }

    #[test]
    fn configured_capacity_reaches_the_session() {
        let mut config = Config::default();
        config.history.capacity = 3;
        let session = open_session(&StoreLocation::Memory, &config).expect("session");
        assert_eq!(session.history().capacity(), 3);
    }

    #[test]
    fn compact_requires_existing_file() {
        let temp = tempdir().expect("temp dir");
        let location = StoreLocation::File(temp.path().join("absent.redb"));
        assert!(cmd_compact(&location).is_err());

        cmd_init(&location, false).expect("init");
        cmd_compact(&location).expect("compact");
    }
}
