use std::cmp;
use std::collections::VecDeque;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use atty::Stream;
use clap::{Args, Parser, Subcommand, ValueEnum};
use fuzzy_catalog::events::typing;
use fuzzy_catalog::{
    Answer, Catalog, CatalogPage, DisplayMode, DomContract, EventLoop, PageEvent, PageLinker,
    Scorer, SearchConfig, SearchSession, normalize_title,
};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fuzzy-catalog", about = "Search generated media catalogs", version)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    tuning: Tuning,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Tuning {
    /// JSON file with search settings and a `dom` section; flags below
    /// override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Absolute minimum score a fuzzy match must reach.
    #[arg(long, global = true)]
    min_score: Option<f64>,
    /// Relative cutoff within the score spread.
    #[arg(long, global = true)]
    relative_cutoff: Option<f64>,
    /// Similarity used to re-score n-gram candidates.
    #[arg(long, global = true, value_enum)]
    scorer: Option<Scorer>,
    /// Id of the search field.
    #[arg(long, global = true)]
    input_id: Option<String>,
    /// Id of the container holding the full catalog.
    #[arg(long, global = true)]
    browse_id: Option<String>,
    /// Id of the container that receives search answers.
    #[arg(long, global = true)]
    answers_id: Option<String>,
}

/// Contents of a `--config` file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct FileConfig {
    #[serde(flatten)]
    search: SearchConfig,
    #[serde(default)]
    dom: DomContract,
}

impl FileConfig {
    fn apply(mut self, tuning: &Tuning) -> Self {
        if let Some(min_score) = tuning.min_score {
            self.search.min_score = min_score;
        }
        if let Some(cutoff) = tuning.relative_cutoff {
            self.search.relative_cutoff = cutoff;
        }
        if let Some(scorer) = tuning.scorer {
            self.search.scorer = scorer;
        }
        if let Some(id) = &tuning.input_id {
            self.dom.input_id = id.clone();
        }
        if let Some(id) = &tuning.browse_id {
            self.dom.browse_id = id.clone();
        }
        if let Some(id) = &tuning.answers_id {
            self.dom.answers_id = id.clone();
        }
        self
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List catalog entries with their normalized titles.
    Entries {
        /// Catalog file (.html, .json or .zst).
        catalog: PathBuf,
        /// Only list normalized titles starting with this prefix.
        #[arg(long)]
        prefix: Option<String>,
        /// Maximum number of entries to list.
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Query a catalog the way the page's search field does.
    Search {
        /// Catalog file (.html, .json or .zst).
        catalog: PathBuf,
        /// Text typed into the search field.
        query: String,
        #[arg(long, value_enum, default_value_t = SearchMode::Fuzzy)]
        mode: SearchMode,
        /// Maximum number of substring hits.
        #[arg(short, long)]
        limit: Option<usize>,
        /// File stem of the exported catalog pages, used for links.
        #[arg(long, default_value = "index")]
        link_stem: String,
        /// Extension of the exported catalog pages, used for links.
        #[arg(long, default_value = ".html")]
        link_ext: String,
    },
    /// Load a catalog page, run a query, and print the answers markup.
    Render {
        /// Catalog page (.html).
        page: PathBuf,
        /// Text typed into the search field.
        query: String,
        /// Replay the query one keystroke at a time.
        #[arg(long = "type")]
        keystrokes: bool,
        /// Print the whole document instead of the answers container.
        #[arg(long)]
        full: bool,
    },
    /// Serve a catalog page and its search API over HTTP.
    #[cfg(feature = "web")]
    Serve {
        /// Catalog page (.html).
        page: PathBuf,
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SearchMode {
    Fuzzy,
    Substring,
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.command);
    let FileConfig {
        search: config,
        dom: contract,
    } = load_config(&cli.tuning)?;
    match cli.command {
        Command::Entries {
            catalog,
            prefix,
            limit,
        } => handle_entries(&catalog, prefix, limit, &config, cli.json),
        Command::Search {
            catalog,
            query,
            mode,
            limit,
            link_stem,
            link_ext,
        } => {
            let linker = PageLinker::new(link_stem, link_ext);
            handle_search(&catalog, &query, mode, limit, &linker, config, cli.json)
        }
        Command::Render {
            page,
            query,
            keystrokes,
            full,
        } => handle_render(
            &page, &query, keystrokes, full, contract, config, cli.json,
        ),
        #[cfg(feature = "web")]
        Command::Serve { page, addr } => handle_serve(&page, addr, contract, config),
    }
}

fn init_tracing(command: &Command) {
    let default_level = match command {
        #[cfg(feature = "web")]
        Command::Serve { .. } => "info",
        _ => "warn",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(tuning: &Tuning) -> Result<FileConfig, Box<dyn Error>> {
    let file: FileConfig = match &tuning.config {
        Some(path) => serde_json::from_slice(&fs::read(path)?)
            .map_err(|err| format!("Invalid config {}: {err}", path.display()))?,
        None => FileConfig::default(),
    };
    Ok(file.apply(tuning))
}

fn handle_entries(
    path: &Path,
    prefix: Option<String>,
    limit: usize,
    config: &SearchConfig,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let limit = cmp::max(1, limit);
    let session = SearchSession::build(Catalog::from_path(path)?, config.clone())?;
    let entries: Vec<_> = match &prefix {
        Some(prefix) => session
            .lookup()
            .prefix(&normalize_title(prefix), limit)
            .into_iter()
            .filter_map(|(_, position)| session.catalog().get(position))
            .collect(),
        None => session.catalog().entries().iter().take(limit).collect(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        match prefix {
            Some(prefix) => println!("No titles start with \"{prefix}\"."),
            None => println!("Catalog is empty."),
        }
        return Ok(());
    }
    let rows: Vec<[String; 3]> = entries
        .iter()
        .map(|entry| {
            [
                entry.id.clone(),
                entry.title.clone(),
                entry.normalized_title.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "TITLE", "NORMALIZED"], &rows);
    Ok(())
}

fn handle_search(
    path: &Path,
    query: &str,
    mode: SearchMode,
    limit: Option<usize>,
    linker: &PageLinker,
    config: SearchConfig,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if query.trim().is_empty() {
        return Err("Search query cannot be empty".into());
    }
    let session = SearchSession::build(Catalog::from_path(path)?, config)?;
    let (display, answers) = match mode {
        SearchMode::Fuzzy => {
            let outcome = session.query(query);
            (outcome.mode, outcome.answers)
        }
        SearchMode::Substring => {
            let limit = cmp::max(1, limit.unwrap_or(session.config().substring_limit));
            (DisplayMode::SearchResults, session.search_contains(query, limit))
        }
    };
    let links: Vec<String> = answers
        .iter()
        .map(|answer| {
            session
                .entry_by_id(&answer.id)
                .map(|entry| linker.href(entry))
                .unwrap_or_default()
        })
        .collect();

    if as_json {
        let payload = json!({
            "query": query,
            "mode": display,
            "results": answers.iter().zip(&links).map(|(answer, href)| {
                json!({
                    "id": answer.id,
                    "title": answer.title,
                    "score": answer.score,
                    "href": href,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if display == DisplayMode::Browse {
        println!(
            "Query \"{query}\" is shorter than {} characters; the page stays in browse mode.",
            session.config().min_query_chars
        );
        return Ok(());
    }
    if answers.is_empty() {
        println!("No titles match \"{query}\".");
        return Ok(());
    }
    if !stdout_is_tty() {
        for (answer, href) in answers.iter().zip(&links) {
            println!("{}\t{}\t{}", answer.id, answer.title, href);
        }
        return Ok(());
    }
    let rows: Vec<[String; 4]> = answers
        .iter()
        .zip(&links)
        .map(|(answer, href)| {
            [
                answer.id.clone(),
                answer.title.clone(),
                format_score(answer),
                href.clone(),
            ]
        })
        .collect();
    println!("Matches for \"{query}\":");
    print_table(&["ID", "TITLE", "SCORE", "LINK"], &rows);
    Ok(())
}

fn handle_render(
    path: &Path,
    query: &str,
    keystrokes: bool,
    full: bool,
    contract: DomContract,
    config: SearchConfig,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let markup = fs::read_to_string(path)?;
    let mut page = CatalogPage::parse(&markup, contract, config);
    let events = if keystrokes {
        typing(query)
    } else {
        VecDeque::from(vec![PageEvent::Load, PageEvent::KeyUp(query.to_string())])
    };
    EventLoop::new(events).run(&mut page)?;

    let html = if full {
        page.document().to_html()
    } else {
        page.answers_html()
    };
    if as_json {
        let payload = json!({
            "query": query,
            "mode": page.mode(),
            "answers": page.last_outcome().map(|outcome| outcome.answers.clone()).unwrap_or_default(),
            "html": html,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{html}");
    }
    Ok(())
}

#[cfg(feature = "web")]
fn handle_serve(
    path: &Path,
    addr: std::net::SocketAddr,
    contract: DomContract,
    config: SearchConfig,
) -> Result<(), Box<dyn Error>> {
    use fuzzy_catalog::web::{WebConfig, serve};

    let markup = fs::read_to_string(path)?;
    let web_config = WebConfig {
        addr,
        search: config,
        contract,
        ..WebConfig::default()
    };
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(&markup, web_config))?;
    Ok(())
}

fn format_score(answer: &Answer) -> String {
    answer
        .score
        .map(|score| format!("{score:.3}"))
        .unwrap_or_else(|| "-".to_string())
}

fn print_table<const N: usize>(headers: &[&str; N], rows: &[[String; N]]) {
    let mut widths: [usize; N] = (*headers).map(|header| header.chars().count());
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }
    let render = |cells: &[&str]| {
        let line = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let pad = width.saturating_sub(cell.chars().count());
                format!("{cell}{}", " ".repeat(pad))
            })
            .collect::<Vec<_>>()
            .join("  ");
        line.trim_end().to_string()
    };
    let rules: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    println!("{}", render(headers));
    println!(
        "{}",
        render(&rules.iter().map(String::as_str).collect::<Vec<_>>())
    );
    for row in rows {
        println!("{}", render(&row.iter().map(String::as_str).collect::<Vec<_>>()));
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn id_flags_override_the_default_contract() {
        let cli = parse(&[
            "fuzzy-catalog",
            "render",
            "page.html",
            "amelie",
            "--browse-id",
            "movies",
            "--answers-id",
            "results",
        ]);
        let config = load_config(&cli.tuning).unwrap();
        assert_eq!(config.dom.input_id, "search");
        assert_eq!(config.dom.browse_id, "movies");
        assert_eq!(config.dom.answers_id, "results");
        assert_eq!(config.search, SearchConfig::default());
    }

    #[test]
    fn config_file_dom_section_and_flags_combine() {
        let file: FileConfig = serde_json::from_str(
            r#"{"min_score": 0.2, "dom": {"input_id": "q", "answers_id": "hits"}}"#,
        )
        .unwrap();
        assert_eq!(file.search.min_score, 0.2);
        assert_eq!(file.dom.input_id, "q");
        assert_eq!(file.dom.browse_id, "catalog");

        let cli = parse(&[
            "fuzzy-catalog",
            "--input-id",
            "query",
            "--min-score",
            "0.3",
            "entries",
            "c.json",
        ]);
        let merged = file.apply(&cli.tuning);
        assert_eq!(merged.search.min_score, 0.3);
        assert_eq!(merged.dom.input_id, "query");
        assert_eq!(merged.dom.answers_id, "hits");
    }

    #[test]
    fn render_uses_the_configured_contract() {
        let markup = r#"<html><body><input id="q">
<div id="movies"><div id="7" data-id="7" data-title="Heat"><h2>Heat</h2></div></div>
<div id="hits" style="display: none"></div></body></html>"#;
        let cli = parse(&[
            "fuzzy-catalog",
            "--input-id",
            "q",
            "--browse-id",
            "movies",
            "--answers-id",
            "hits",
            "render",
            "page.html",
            "heat",
        ]);
        let config = load_config(&cli.tuning).unwrap();
        let mut page = CatalogPage::parse(markup, config.dom, config.search);
        let events = VecDeque::from(vec![PageEvent::Load, PageEvent::KeyUp("heat".into())]);
        EventLoop::new(events).run(&mut page).unwrap();
        assert!(page.answers_html().contains("<h2>Heat</h2>"));
        let input = page.document().element_by_id("q").unwrap();
        assert_eq!(page.document().attr(input, "value"), Some("heat"));
    }
}
