use std::{
    fs,
    io::{self, Read},
    process,
};

use serde_json::{Map, Value as Json};
use tracing::{Dispatch, Level, debug, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;
use typecache::{
    CacheConfig, ClassCache, KeyTemplate, TypeRegistry,
    cache::{CacheError, KeyContext},
    config::{self, CacheSettings, DecodeArgs, KeyArgs},
    infra::{error::InfraError, telemetry},
};

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        InfraError::configuration(format!("failed to load configuration: {err}"))
    })?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        config::Command::Decode(args) => run_decode(args, &settings.cache),
        config::Command::Key(args) => run_key(args),
    }
}

fn run_decode(args: DecodeArgs, cache_settings: &CacheSettings) -> Result<(), InfraError> {
    let text = match args.file.as_ref() {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let cache = ClassCache::in_memory(TypeRegistry::global(), CacheConfig::from(cache_settings));
    debug!(
        types = cache.registry().len(),
        config = ?cache.config(),
        "Decoding with global registry"
    );
    let value = cache.decode(&text)?;

    if args.pretty {
        println!("{value:#?}");
    } else {
        println!("{value:?}");
    }
    Ok(())
}

fn run_key(args: KeyArgs) -> Result<(), InfraError> {
    let template = KeyTemplate::parse(args.template.as_str()).map_err(CacheError::from)?;
    let fields = build_fields(&args.fields)?;

    let mut cx = KeyContext::new().with_fields(&fields);
    if let Some(model) = args.model.as_deref() {
        cx = cx.with_model(model);
    }
    if let Some(function) = args.function.as_deref() {
        cx = cx.with_function(function);
    }

    let key = template.resolve(&cx).map_err(CacheError::from)?;
    println!("{key}");
    Ok(())
}

fn build_fields(pairs: &[(String, String)]) -> Result<Map<String, Json>, InfraError> {
    let mut root = Map::new();
    for (path, value) in pairs {
        let mut parts: Vec<&str> = path.split('.').collect();
        let leaf = parts.pop().unwrap_or(path.as_str());

        let mut node = &mut root;
        for part in parts {
            let entry = node
                .entry(part.to_string())
                .or_insert_with(|| Json::Object(Map::new()));
            node = match entry {
                Json::Object(child) => child,
                _ => {
                    return Err(InfraError::configuration(format!(
                        "field `{path}` nests under a scalar"
                    )));
                }
            };
        }
        node.insert(leaf.to_string(), Json::String(value.clone()));
    }
    Ok(root)
}
