use clap::{Parser, Subcommand};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

/// Moods the classifier model can emit.
const KNOWN_MOODS: &[&str] = &["sadness", "joy", "love", "anger", "fear", "surprise"];

#[derive(Parser, Debug)]
#[command(name = "moodlens_panel", version)]
struct Args {
    /// Core base URL, e.g. http://127.0.0.1:17610
    #[arg(long, default_value = "http://127.0.0.1:17610")]
    core_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the selected moods and whether auto-filter is on.
    Show,
    /// Flip one mood in or out of the selection.
    Toggle { mood: String },
    /// Overwrite preferences.
    Set {
        /// Comma-separated moods, e.g. anger,fear
        #[arg(long, value_delimiter = ',')]
        moods: Option<Vec<String>>,
        #[arg(long, action = clap::ArgAction::Set)]
        auto_filter: Option<bool>,
    },
    /// Ask the core to filter the page now.
    Run,
    /// Print how much of the current page has been analyzed and hidden.
    Page,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
struct Preferences {
    moods: Vec<String>,
    #[serde(rename = "autoFilter")]
    auto_filter: bool,
}

#[derive(Serialize, Default)]
struct PreferencesUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    moods: Option<Vec<String>>,
    #[serde(rename = "autoFilter", skip_serializing_if = "Option::is_none")]
    auto_filter: Option<bool>,
}

#[derive(Serialize)]
struct Message {
    action: &'static str,
}

#[derive(Deserialize)]
struct PageSummary {
    url: String,
    analyzed: usize,
    suppressed: usize,
}

#[derive(Deserialize)]
struct OkResponse<T> {
    ok: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moodlens_panel=info".into()),
        )
        .init();

    let args = Args::parse();
    let client = reqwest::Client::new();
    let base = args.core_url.trim_end_matches('/');

    match args.command {
        Command::Show => {
            let prefs: Preferences = get_ok(&client, &format!("{base}/settings")).await?;
            print_prefs(&prefs);
        }
        Command::Toggle { mood } => {
            let prefs: Preferences = get_ok(&client, &format!("{base}/settings")).await?;
            let moods = toggle_mood(prefs.moods, &mood);
            let saved = save(
                &client,
                base,
                PreferencesUpdate {
                    moods: Some(moods),
                    auto_filter: None,
                },
            )
            .await?;
            print_prefs(&saved);
        }
        Command::Set { moods, auto_filter } => {
            if moods.is_none() && auto_filter.is_none() {
                anyhow::bail!("nothing to set: pass --moods and/or --auto-filter");
            }
            let saved = save(&client, base, PreferencesUpdate { moods, auto_filter }).await?;
            print_prefs(&saved);
        }
        Command::Run => {
            let prefs: Preferences = get_ok(&client, &format!("{base}/settings")).await?;
            if prefs.auto_filter {
                println!("Auto-filter is on; the page is already being filtered.");
                return Ok(());
            }
            post_ok_opt::<_, serde_json::Value>(
                &client,
                &format!("{base}/message"),
                &Message {
                    action: "runFilter",
                },
            )
            .await?;
            info!("filter requested");
        }
        Command::Page => {
            let page: PageSummary = get_ok(&client, &format!("{base}/page")).await?;
            println!(
                "{}: {} analyzed, {} hidden",
                page.url, page.analyzed, page.suppressed
            );
        }
    }
    Ok(())
}

async fn save(
    client: &reqwest::Client,
    base: &str,
    mut update: PreferencesUpdate,
) -> anyhow::Result<Preferences> {
    if let Some(moods) = update.moods.as_mut() {
        moods.iter_mut().for_each(|m| *m = m.trim().to_lowercase());
        moods.retain(|m| !m.is_empty());
        for m in moods.iter() {
            if !KNOWN_MOODS.contains(&m.as_str()) {
                warn!("'{m}' is not a mood the classifier reports; it will never match");
            }
        }
    }
    let prefs: Preferences = post_ok(client, &format!("{base}/settings"), &update).await?;
    info!("MoodLens: Saved state {:?}", prefs);
    Ok(prefs)
}

fn toggle_mood(mut moods: Vec<String>, mood: &str) -> Vec<String> {
    let mood = mood.trim().to_lowercase();
    if let Some(pos) = moods.iter().position(|m| *m == mood) {
        moods.remove(pos);
    } else {
        moods.push(mood);
    }
    moods
}

fn print_prefs(prefs: &Preferences) {
    for mood in KNOWN_MOODS {
        let mark = if prefs.moods.iter().any(|m| m == mood) { "x" } else { " " };
        println!("[{mark}] {mood}");
    }
    for extra in prefs.moods.iter().filter(|m| !KNOWN_MOODS.contains(&m.as_str())) {
        println!("[x] {extra} (unknown)");
    }
    println!(
        "auto-filter: {}",
        if prefs.auto_filter { "on" } else { "off" }
    );
}

async fn get_ok<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> anyhow::Result<T> {
    let res = client.get(url).send().await?;
    unwrap_ok(res)
        .await?
        .ok_or_else(|| anyhow::anyhow!("missing_data"))
}

async fn post_ok<B: Serialize, T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> anyhow::Result<T> {
    post_ok_opt(client, url, body)
        .await?
        .ok_or_else(|| anyhow::anyhow!("missing_data"))
}

async fn post_ok_opt<B: Serialize, T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> anyhow::Result<Option<T>> {
    let res = client.post(url).json(body).send().await?;
    unwrap_ok(res).await
}

async fn unwrap_ok<T: DeserializeOwned>(res: reqwest::Response) -> anyhow::Result<Option<T>> {
    let status = res.status();
    let body: OkResponse<T> = res.json().await?;
    if !status.is_success() || !body.ok {
        anyhow::bail!(
            "core rejected request: http_{} {}",
            status.as_u16(),
            body.error.unwrap_or_default()
        );
    }
    Ok(body.data)
}
