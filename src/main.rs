use anyhow::{Context, Result, anyhow, bail};
use autumnus::{FormatterOption, Options, highlight, themes};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{ArgValueCompleter, CompletionCandidate};
use email_address::EmailAddress;
use futures::StreamExt;
use iocraft::prelude::*;
use renderiq::render::{DEFAULT_ASPECT_RATIO, DEFAULT_QUALITY, DEFAULT_STYLE};
use renderiq::transport::{DEFAULT_BASE_URL, DEFAULT_PLATFORM};
use renderiq::{
    DEFAULT_CHUNK_SIZE, DEFAULT_PROJECT_PAGE_SIZE, RenderRequest, RenderiqClient, UploadEvent,
    webhook,
};
use serde::Serialize;
use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::{runtime::Handle, sync::watch};
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::ui::{
    ConfigHeader, ErrorMessage, FollowRenderStatus, InputPrompt, ProgressBar, ProjectList,
    RenderStatus, SuccessMessage,
};

mod config;
mod ui;

/// Files above this size go through a resumable upload even without `--resumable`.
const RESUMABLE_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "riq")]
#[command(version)]
#[command(about = "A tool interacting with the Renderiq plugin API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RenderArgs {
    /// Image file to render
    #[arg(value_hint = ValueHint::FilePath, required_unless_present = "url")]
    image: Option<PathBuf>,
    /// URL of an already hosted image, used instead of a file
    #[arg(long, conflicts_with = "image")]
    url: Option<String>,
    /// Description of the desired render
    #[arg(short, long)]
    prompt: Option<String>,
    /// Render quality (standard, high, ultra)
    #[arg(short, long, default_value = DEFAULT_QUALITY)]
    quality: String,
    #[arg(short, long, default_value = DEFAULT_ASPECT_RATIO)]
    aspect_ratio: String,
    #[arg(short, long, default_value = DEFAULT_STYLE)]
    style: String,
    /// Project to file the render under
    #[arg(long, add = ArgValueCompleter::new(project_completer))]
    project: Option<String>,
    /// Webhook URL called when the render finishes
    #[arg(long)]
    callback_url: Option<String>,
    /// Upload the image in chunks through a resumable session
    #[arg(short, long)]
    resumable: bool,
    /// Chunk size in bytes for resumable uploads
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,
    /// Follow render status until completion
    #[arg(short, long)]
    follow: bool,
}

#[derive(Subcommand)]
enum WebhookCommands {
    /// Register a webhook for render events
    Register {
        /// HTTPS endpoint receiving deliveries
        url: String,
        /// Event to subscribe to, may be repeated
        #[arg(short, long = "event", required = true)]
        events: Vec<String>,
        /// Shared secret for signatures (generated by the service if omitted)
        #[arg(short, long)]
        secret: Option<String>,
    },
    /// Check the signature of a delivered payload
    Verify {
        /// File containing the raw request body
        #[arg(value_hint = ValueHint::FilePath)]
        payload: PathBuf,
        /// Value of the X-Renderiq-Signature header
        #[arg(long)]
        signature: String,
        #[arg(long)]
        secret: String,
    },
}

#[derive(Subcommand)]
enum Commands {
    /// Configure riq interactively
    Config,
    /// Store your API key in the OS keyring
    SetApiKey { api_key: String },
    /// Sign in with email and password and store the access token
    Signin {
        email: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Exchange the stored refresh token for a new access token
    Refresh,
    /// Show the current user
    Me,
    /// Show your credit balance
    Credits,
    /// Create a render
    Render(RenderArgs),
    /// Inspect a render
    Status {
        id: String,
        /// Follow render status updates until completion
        #[arg(short, long)]
        follow: bool,
        /// Delay between status polls
        #[arg(long, value_parser = humantime::parse_duration, default_value = "2s")]
        interval: Duration,
    },
    /// List projects
    Projects {
        #[arg(short, long, default_value_t = DEFAULT_PROJECT_PAGE_SIZE)]
        limit: u32,
        #[arg(short, long, default_value_t = 0)]
        offset: u32,
        /// Only show projects created from this platform
        #[arg(short, long)]
        platform: Option<String>,
    },
    /// Show a project
    Project {
        #[arg(add = ArgValueCompleter::new(project_completer))]
        id: String,
    },
    /// Create a project
    CreateProject {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Cover image for the project
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        image: Option<PathBuf>,
    },
    /// Manage webhooks
    Webhook {
        #[command(subcommand)]
        command: WebhookCommands,
    },
}

fn main() -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let _rt_guard = rt.enter();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    init_tracing();
    let cli = Cli::parse();

    rt.block_on(async {
        match cli.command {
            Commands::Config => interactive_config(),
            Commands::SetApiKey { api_key } => config::set_api_key_keyring(api_key),
            Commands::Webhook {
                command:
                    WebhookCommands::Verify {
                        payload,
                        signature,
                        secret,
                    },
            } => verify_webhook(payload, &signature, &secret),
            requires_credentials => {
                let config = config::read_config()?;
                let client = config.client()?;

                match requires_credentials {
                    Commands::Signin { email, password } => signin(&client, email, password).await,
                    Commands::Refresh => refresh(&client).await,
                    Commands::Me => {
                        let user = client.user_info().await?;
                        print_json(&user)
                    }
                    Commands::Credits => {
                        let credits = client.credits().await?;
                        println!("Credit balance: {}", credits.balance);
                        Ok(())
                    }
                    Commands::Render(args) => create_render(Arc::new(client), args).await,
                    Commands::Status {
                        id,
                        follow,
                        interval,
                    } => render_status(Arc::new(client), id, follow, interval).await,
                    Commands::Projects {
                        limit,
                        offset,
                        platform,
                    } => list_projects(&client, limit, offset, platform).await,
                    Commands::Project { id } => {
                        let project = client.project(&id).await?;
                        print_json(&project)
                    }
                    Commands::CreateProject {
                        name,
                        description,
                        image,
                    } => {
                        let project = client
                            .create_project(&name, description.as_deref(), image.as_deref())
                            .await?;
                        println!("Project created successfully with ID: {}", project.id);
                        Ok(())
                    }
                    Commands::Webhook {
                        command:
                            WebhookCommands::Register {
                                url,
                                events,
                                secret,
                            },
                    } => {
                        let hook = client.register_webhook(&url, events, secret).await?;
                        println!("Webhook registered with ID: {}", hook.id);
                        if let Some(secret) = hook.secret {
                            println!("Signing secret: {}", secret);
                        }
                        Ok(())
                    }
                    Commands::Config
                    | Commands::SetApiKey { .. }
                    | Commands::Webhook {
                        command: WebhookCommands::Verify { .. },
                    } => unreachable!("handled without credentials"),
                }
            }
        }
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RIQ_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let output = highlight(
        &serde_json::to_string_pretty(value)?,
        Options {
            formatter: FormatterOption::Terminal {
                theme: Some(themes::get("ayu_light").expect("Syntax highlighting theme not found")),
            },
            lang_or_file: Some("json"),
        },
    );
    println!("{}", output);
    Ok(())
}

async fn signin(client: &RenderiqClient, email: String, password: Option<String>) -> Result<()> {
    if !EmailAddress::is_valid(&email) {
        bail!("'{}' is not a valid email address", email);
    }
    let password = match password {
        Some(password) => password,
        None => read_input("Password", None, None)?,
    };

    let tokens = client.sign_in(&email, &password).await?;
    config::set_secret(config::KEYRING_ACCESS_TOKEN, &tokens.access_token)?;
    if let Some(refresh_token) = &tokens.refresh_token {
        config::set_secret(config::KEYRING_REFRESH_TOKEN, refresh_token)?;
    }

    let who = tokens
        .user
        .and_then(|u| u.email.or(u.name))
        .unwrap_or(email);
    element!(SuccessMessage(message: format!("Signed in as {}", who))).print();
    Ok(())
}

async fn refresh(client: &RenderiqClient) -> Result<()> {
    let refresh_token = config::stored_refresh_token()
        .ok_or_else(|| anyhow!("No refresh token stored, run `riq signin` first"))?;

    let tokens = client.refresh_token(&refresh_token).await?;
    config::set_secret(config::KEYRING_ACCESS_TOKEN, &tokens.access_token)?;
    if let Some(refresh_token) = &tokens.refresh_token {
        config::set_secret(config::KEYRING_REFRESH_TOKEN, refresh_token)?;
    }

    element!(SuccessMessage(message: "Access token refreshed".to_string())).print();
    Ok(())
}

async fn create_render(client: Arc<RenderiqClient>, args: RenderArgs) -> Result<()> {
    let mut request = match (&args.url, &args.image) {
        (Some(url), _) => RenderRequest::from_url(url.clone()),
        (None, Some(image)) => RenderRequest::from_file(image.clone()),
        (None, None) => bail!("Either an image file or --url is required"),
    };
    request.prompt = args.prompt;
    request.quality = args.quality;
    request.aspect_ratio = args.aspect_ratio;
    request.style = args.style;
    request.project_id = args.project;
    request.callback_url = args.callback_url;
    request.chunk_size = args.chunk_size;

    if let Some(image) = &args.image {
        let file_size = fs::metadata(image)
            .with_context(|| format!("Failed to read {}", image.display()))?
            .len();
        request.resumable = args.resumable || file_size > RESUMABLE_THRESHOLD_BYTES;
    }

    let render = if request.resumable && request.image_url.is_none() {
        let image_url = upload_with_progress(&client, &request).await?;
        client.create_render_from_url(&request, &image_url).await?
    } else {
        client.create_render(&request).await?
    };

    println!("Render created with ID: {}", render.render_id);

    if args.follow {
        render_status(client, render.render_id, true, renderiq::DEFAULT_POLL_INTERVAL).await?;
    }
    Ok(())
}

async fn upload_with_progress(client: &RenderiqClient, request: &RenderRequest) -> Result<String> {
    let payload = request.upload_payload().await?;

    let mut stream = client.uploader(request.chunk_size)?.upload_events(payload)?;
    let (tx, rx) = watch::channel(0.0);

    let process_stream = async {
        let mut finalized = None;
        while let Some(event) = stream.next().await {
            match event? {
                UploadEvent::Progress(p) => {
                    let percent = (p.bytes_uploaded as f32 / p.total_bytes as f32) * 100.0;
                    let _ = tx.send(percent);
                }
                UploadEvent::Complete(done) => {
                    finalized = Some(done);
                    break;
                }
            }
        }
        finalized.ok_or_else(|| anyhow!("Upload ended without being finalized"))
    };

    let mut progress_bar =
        element!(ProgressBar(title: "Uploading image".to_string(), progress: Some(rx)));

    let finalized = tokio::select! {
        result = process_stream => result?,
        _ = progress_bar.render_loop() => {
            unreachable!("render_loop should not terminate")
        }
    };

    Ok(finalized.url)
}

async fn render_status(
    client: Arc<RenderiqClient>,
    render_id: String,
    follow: bool,
    interval: Duration,
) -> Result<()> {
    if follow {
        element! {
            FollowRenderStatus(client: Some(client.clone()), render_id: render_id, interval: interval)
        }
        .render_loop()
        .await?;
    } else {
        let render = client.render_status(&render_id).await?;
        element!(RenderStatus(render: Some(render))).print();
    }

    Ok(())
}

async fn list_projects(
    client: &RenderiqClient,
    limit: u32,
    offset: u32,
    platform: Option<String>,
) -> Result<()> {
    let page = client
        .list_projects(limit, offset, platform.as_deref())
        .await?;

    element!(ProjectList(projects: page.projects, total: page.total)).print();

    Ok(())
}

fn verify_webhook(payload: PathBuf, signature: &str, secret: &str) -> Result<()> {
    let body = fs::read_to_string(&payload)
        .with_context(|| format!("Failed to read {}", payload.display()))?;

    if webhook::verify_signature(&body, signature.trim(), secret) {
        element!(SuccessMessage(message: "Signature is valid".to_string())).print();
        Ok(())
    } else {
        element!(ErrorMessage(message: "Signature does not match".to_string())).print();
        bail!("Webhook signature verification failed")
    }
}

fn project_completer(current: &std::ffi::OsStr) -> Vec<CompletionCandidate> {
    let mut completions = vec![];
    let Some(current) = current.to_str() else {
        return completions;
    };

    let Ok(client) = config::read_config().and_then(|config| config.client()) else {
        return completions;
    };

    let handle = Handle::current();
    let Ok(page) = handle.block_on(client.list_projects(DEFAULT_PROJECT_PAGE_SIZE, 0, None)) else {
        return completions;
    };

    page.projects.into_iter().for_each(|project| {
        if project.id.starts_with(current) {
            completions.push(CompletionCandidate::new(project.id).help(Some(project.name.into())));
        }
    });

    completions
}

fn read_input(prompt: &str, default: Option<&str>, description: Option<&str>) -> Result<String> {
    element! {
        InputPrompt(
            prompt: prompt.to_string(),
            default: default.map(|s| s.to_string()),
            description: description.map(|s| s.to_string())
        )
    }
    .print();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();

    if input.is_empty() {
        if let Some(def) = default {
            Ok(def.to_string())
        } else {
            Ok(input)
        }
    } else {
        Ok(input)
    }
}

fn optional(input: String) -> Option<String> {
    if input.is_empty() { None } else { Some(input) }
}

fn interactive_config() -> Result<()> {
    element!(ConfigHeader()).print();

    let base_url = loop {
        let base_url_str = read_input(
            "Renderiq Base URL",
            Some(DEFAULT_BASE_URL),
            Some("The base URL of the Renderiq service"),
        )?;

        match Url::parse(&base_url_str) {
            Ok(url) => break url,
            Err(e) => {
                element!(ErrorMessage(message: format!("Invalid URL: {}", e))).print();
                println!();
            }
        }
    };

    let platform = read_input(
        "Platform",
        Some(DEFAULT_PLATFORM),
        Some("Sent as X-Renderiq-Platform on every request"),
    )?;

    let plugin_version = optional(read_input(
        "Plugin Version",
        None,
        Some("Optional: sent as X-Renderiq-Plugin-Version"),
    )?);

    let api_key = optional(read_input(
        "API Key",
        None,
        Some("Optional: your Renderiq API key (stored securely in OS keyring), or use `riq signin` later"),
    )?);

    if let Some(api_key) = api_key {
        config::set_api_key_keyring(api_key)?;
    }

    let config_file = config::ConfigFile {
        base_url: Some(base_url),
        platform: Some(platform),
        plugin_version,
    };

    config::write_config(config_file)?;

    element!(SuccessMessage(message: "Configuration complete!".to_string())).print();

    Ok(())
}
