use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use lister_core::{
    FetchOptions, Host, ListerConfig, ListerRuntime, OpenOptions, PresetRegistry, api_fetch_any,
};
use lister_http::ReqwestTransport;
use lister_model::{ListerOption, Map, SearchTarget};
use tracing::{debug, info};

use crate::cli::{FetchArgs, OutputFormatArg, SearchArgs};
use crate::render::{render_csv, render_json, render_presets, render_table};

/// Load the config and build the preset registry it describes.
pub fn load_presets(path: &Path) -> Result<(ListerConfig, PresetRegistry)> {
    let config = ListerConfig::load(path)?;
    let registry = PresetRegistry::from_specs(config.presets.iter().cloned());
    info!(path = %path.display(), presets = registry.len(), "loaded lister config");
    Ok((config, registry))
}

pub fn presets_table(registry: &PresetRegistry) -> Table {
    let defs: Vec<_> = registry
        .kinds()
        .into_iter()
        .filter_map(|kind| registry.get(&kind).map(|def| (kind, def)))
        .collect();
    render_presets(defs.iter().map(|(kind, def)| (kind.as_str(), def.as_ref())))
}

pub fn run_presets(path: &Path) -> Result<()> {
    let (_, registry) = load_presets(path)?;
    if registry.is_empty() {
        println!("No presets defined in {}", path.display());
        return Ok(());
    }
    println!("{}", presets_table(&registry));
    Ok(())
}

fn build_host(config: &ListerConfig) -> Result<Host> {
    let transport = ReqwestTransport::new(&config.http).context("build HTTP client")?;
    Ok(Host::new(Arc::new(transport)))
}

fn filter_map(filters: &[(String, serde_json::Value)]) -> Map {
    filters.iter().cloned().collect()
}

/// Spinner on stderr, hidden when stderr is not a terminal.
fn spinner(message: String) -> ProgressBar {
    if !io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

pub async fn run_fetch(args: &FetchArgs) -> Result<Vec<ListerOption>> {
    let (config, registry) = load_presets(&args.config.path)?;
    let host = build_host(&config)?;
    let filters = filter_map(&args.filters);
    let opts = FetchOptions {
        cursor: args.cursor.clone(),
        ..FetchOptions::default().with_query(args.query.clone())
    };

    let bar = spinner(format!("Fetching {}", args.kind));
    let result = api_fetch_any(&host, &registry, args.kind.as_str(), &filters, &opts).await;
    bar.finish_and_clear();

    let output = result?;
    debug!(kind = %args.kind, items = output.raw_list.len(), "fetch finished");
    Ok(output.options_list)
}

/// Open one session, wait for it to settle and return what it shows.
pub async fn run_search(args: &SearchArgs) -> Result<Vec<ListerOption>> {
    let fetch = &args.fetch;
    let (config, registry) = load_presets(&fetch.config.path)?;
    let host = build_host(&config)?;
    let runtime = ListerRuntime::new(host, Arc::new(registry), config.runtime.clone());

    let mut opts = OpenOptions::default().query(fetch.query.clone());
    if let Some(mode) = args.mode {
        opts = opts.search_mode(mode.into());
    }
    if let Some(subject) = &args.subject {
        opts = opts.search_target(SearchTarget::subject(subject.clone()));
    }
    let id = runtime.open(&fetch.kind, filter_map(&fetch.filters), opts)?;
    if let Some(cursor) = &fetch.cursor {
        runtime.set_cursor(&id, Some(cursor.clone()))?;
    }

    let bar = spinner(format!("Searching {}", fetch.kind));
    runtime.settled(&id).await;
    bar.finish_and_clear();

    let state = runtime
        .snapshot(&id)
        .context("session closed before it settled")?;
    if let Some(code) = state.error_code {
        let message = state.error.unwrap_or_default();
        runtime.dispose();
        bail!("{} [{code}]: {message}", fetch.kind);
    }
    let visible = runtime.visible(&id).unwrap_or_default();
    debug!(
        kind = %fetch.kind,
        fetched = state.options.len(),
        visible = visible.len(),
        "search settled"
    );
    runtime.dispose();
    Ok(visible)
}

pub fn print_options(options: &[ListerOption], format: OutputFormatArg) -> Result<()> {
    match format {
        OutputFormatArg::Table => println!("{}", render_table(options)),
        OutputFormatArg::Json => println!("{}", render_json(options)?),
        OutputFormatArg::Csv => print!("{}", render_csv(options)?),
    }
    Ok(())
}
