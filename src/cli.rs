//! leafscan - command-line client for the leaf diagnosis service
//!
//! Subcommands cover the whole user surface: account management, predictions
//! from a file or camera (with crop rounds when the server asks for them), and
//! history browsing.
//!
//! Ctrl-C while a prediction is in flight aborts it; the late answer is ignored.
//! Anywhere else, including the crop prompt, Ctrl-C exits.

use anyhow::{anyhow, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use crate::api::types::{PredictionResponse, UserStats};
use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::crop::{AspectRatio, CropNegotiator, CropOutcome};
use crate::error::{ClientError, ClientResult};
use crate::geometry::{CropRectangle, DisplayBox, Size};
use crate::history::{HistoryQuery, HistoryViewer, OrderBy, OrderDir};
use crate::ingest::{CameraSource, Facing, FileSource};
use crate::raster::RawImage;
use crate::session::{PredictionSession, SessionState, Step, Verdict};
use crate::ui::{Ui, UiMode};

/// Viewport the crop selection is negotiated in.
const CROP_VIEWPORT: Size = Size::new(800, 800);
/// Each automatic crop round keeps this fraction of the previous selection.
const AUTO_CROP_SHRINK: f64 = 0.8;

#[derive(Parser, Debug)]
#[command(name = "leafscan", version, about = "Leaf disease diagnosis client")]
struct Args {
    /// Progress output style
    #[arg(long, value_enum, default_value_t = UiMode::Auto, global = true)]
    ui: UiMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account
    Register(CredentialArgs),

    /// Log in and remember the session
    Login(CredentialArgs),

    /// Log out and forget the session
    Logout,

    /// Show who the server thinks we are
    Whoami,

    /// Diagnose a leaf photo
    Predict(PredictArgs),

    /// Browse detection history
    History(HistoryArgs),

    /// Delete a history record
    Delete {
        record_id: i64,
    },

    /// Show the account profile
    Profile,

    /// Show detection statistics
    Stats,

    /// Change the account password
    ChangePassword {
        #[arg(long, env = "LEAFSCAN_OLD_PASSWORD", hide_env_values = true)]
        old: Option<String>,
        #[arg(long, env = "LEAFSCAN_NEW_PASSWORD", hide_env_values = true)]
        new: Option<String>,
    },

    /// Change the display name
    UpdateProfile {
        #[arg(long)]
        username: String,
    },
}

#[derive(ClapArgs, Debug)]
struct CredentialArgs {
    #[arg(long)]
    email: String,
    /// Read from stdin when omitted
    #[arg(long, env = "LEAFSCAN_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(ClapArgs, Debug)]
struct PredictArgs {
    /// Image file to upload
    #[arg(long, conflicts_with = "camera", required_unless_present = "camera")]
    file: Option<PathBuf>,

    /// Capture from the configured camera
    #[arg(long)]
    camera: bool,

    /// Use the front (user-facing) camera
    #[arg(long, requires = "camera")]
    front: bool,

    /// Crop for each round the server asks for, in original pixels: x,y,width,height
    #[arg(long = "crop", value_parser = parse_crop_arg)]
    crops: Vec<[u32; 4]>,

    /// Answer crop requests with successively tighter centered squares
    #[arg(long, conflicts_with = "crops")]
    auto_crop: bool,

    /// Print the raw server response as JSON
    #[arg(long)]
    json: bool,
}

#[derive(ClapArgs, Debug)]
struct HistoryArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = crate::history::DEFAULT_PER_PAGE)]
    per_page: u32,
    /// Server-side disease filter
    #[arg(long)]
    disease: Option<String>,
    #[arg(long)]
    min_confidence: Option<f64>,
    #[arg(long, default_value = "created_at")]
    order_by: String,
    #[arg(long, default_value = "DESC")]
    order_dir: String,
    /// Client-side filter over the fetched page
    #[arg(long)]
    filter: Option<String>,
    /// Client-side sort over the fetched page: field[:ASC|DESC]
    #[arg(long)]
    sort: Option<String>,
    #[arg(long)]
    json: bool,
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = ClientConfig::load()?;
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());
    let mut client = ApiClient::new(cfg.api.clone())?;

    let result = match args.command {
        Command::Register(creds) => cmd_register(&mut client, &creds),
        Command::Login(creds) => cmd_login(&mut client, &creds),
        Command::Logout => cmd_logout(&mut client),
        Command::Whoami => cmd_whoami(&mut client),
        Command::Predict(predict) => cmd_predict(client, &cfg, &ui, &predict),
        Command::History(history) => cmd_history(&mut client, &ui, &history),
        Command::Delete { record_id } => cmd_delete(&mut client, record_id),
        Command::Profile => cmd_profile(&mut client),
        Command::Stats => cmd_stats(&mut client),
        Command::ChangePassword { old, new } => cmd_change_password(&mut client, old, new),
        Command::UpdateProfile { username } => cmd_update_profile(&mut client, &username),
    };
    result.map_err(|err| match err.downcast::<ClientError>() {
        Ok(client_err) => {
            if client_err.requires_login() {
                anyhow!("{} Run `leafscan login --email <you>`.", client_err.user_message())
            } else {
                anyhow!(client_err.user_message())
            }
        }
        Err(other) => other,
    })
}

fn cmd_register(client: &mut ApiClient, creds: &CredentialArgs) -> Result<()> {
    let password = password_or_prompt(creds.password.clone(), "Password")?;
    let status = client.register(&creds.email, &password)?;
    println!(
        "Registered {} ({})",
        creds.email,
        status.status.as_deref().unwrap_or("ok")
    );
    println!("Log in with: leafscan login --email {}", creds.email);
    Ok(())
}

fn cmd_login(client: &mut ApiClient, creds: &CredentialArgs) -> Result<()> {
    let password = password_or_prompt(creds.password.clone(), "Password")?;
    client.login(&creds.email, &password)?;
    println!(
        "Logged in as {}",
        client.auth().email().unwrap_or(&creds.email)
    );
    Ok(())
}

fn cmd_logout(client: &mut ApiClient) -> Result<()> {
    client.logout()?;
    println!("Logged out");
    Ok(())
}

fn cmd_whoami(client: &mut ApiClient) -> Result<()> {
    let status = client.check_auth()?;
    match (status.authenticated, status.email) {
        (true, Some(email)) => println!("{}", email),
        (true, None) => println!("logged in"),
        (false, _) => println!("not logged in"),
    }
    Ok(())
}

fn cmd_profile(client: &mut ApiClient) -> Result<()> {
    let profile = client.profile()?;
    println!("Email:      {}", profile.email);
    println!(
        "Username:   {}",
        profile.username.as_deref().unwrap_or("-")
    );
    println!(
        "Created:    {}",
        profile.created_at.as_deref().unwrap_or("-")
    );
    println!(
        "Last login: {}",
        profile.last_login.as_deref().unwrap_or("-")
    );
    Ok(())
}

fn cmd_stats(client: &mut ApiClient) -> Result<()> {
    let stats = client.stats()?;
    print_stats(&stats);
    Ok(())
}

fn cmd_change_password(
    client: &mut ApiClient,
    old: Option<String>,
    new: Option<String>,
) -> Result<()> {
    let old = password_or_prompt(old, "Current password")?;
    let new = password_or_prompt(new, "New password")?;
    let status = client.change_password(&old, &new)?;
    println!("{}", status.status.as_deref().unwrap_or("Password changed"));
    Ok(())
}

fn cmd_update_profile(client: &mut ApiClient, username: &str) -> Result<()> {
    let status = client.update_profile(username)?;
    println!("{}", status.status.as_deref().unwrap_or("Profile updated"));
    Ok(())
}

fn cmd_delete(client: &mut ApiClient, record_id: i64) -> Result<()> {
    client.delete_history(record_id)?;
    println!("Deleted record {}", record_id);
    Ok(())
}

fn cmd_history(client: &mut ApiClient, ui: &Ui, args: &HistoryArgs) -> Result<()> {
    let query = HistoryQuery {
        page: args.page,
        per_page: args.per_page,
        disease: args.disease.clone(),
        min_confidence: args.min_confidence,
        order_by: args.order_by.parse()?,
        order_dir: args.order_dir.parse()?,
    };
    let mut viewer = HistoryViewer::new();
    {
        let stage = ui.stage("Loading history");
        if let Err(err) = viewer.load(client, query) {
            stage.fail(&err.user_message());
            return Err(err.into());
        }
    }
    if let Some(filter) = &args.filter {
        viewer.filter_disease(filter);
    }
    if let Some(sort) = &args.sort {
        let (field, dir) = parse_sort_arg(sort)?;
        viewer.sort_by(field, dir);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(viewer.records())?);
        return Ok(());
    }
    let pagination = viewer.pagination();
    println!(
        "Page {}/{} ({} records total)",
        pagination.page,
        pagination.total_pages.max(1),
        pagination.total
    );
    if viewer.records().is_empty() {
        println!("No records.");
    }
    for record in viewer.records() {
        println!(
            "#{:<6} {:<32} {:>6.1}%  {:<10} {}",
            record.id,
            record.label(),
            record.confidence * 100.0,
            record.severity.as_deref().unwrap_or("-"),
            record.created_at.as_deref().unwrap_or("-")
        );
    }
    if pagination.has_next {
        println!("More: leafscan history --page {}", pagination.page + 1);
    }
    Ok(())
}

fn cmd_predict(client: ApiClient, cfg: &ClientConfig, ui: &Ui, args: &PredictArgs) -> Result<()> {
    let image = acquire_image(cfg, ui, args)?;
    let signal = Arc::new(AbortSignal::default());
    {
        let signal = signal.clone();
        ctrlc::set_handler(move || {
            if !signal.interrupt() {
                eprintln!();
                std::process::exit(130);
            }
        })?;
    }

    let mut session = PredictionSession::new(cfg.capture.max_crop_count);
    let mut client = client;
    let (ticket, request) = session.begin_submit(image)?;
    let (returned, result) = match dispatch(client, ui, "Diagnosing", &signal, move |c| {
        c.predict(&request)
    })? {
        Some(done) => done,
        None => {
            session.abort()?;
            println!("Cancelled.");
            return Ok(());
        }
    };
    client = returned;
    let mut step = session.complete(ticket, result)?;

    let interactive = crop_is_interactive(args);
    let mut round = 0usize;
    loop {
        match step {
            Step::Done(verdict) => {
                print_verdict(&client, &verdict, args.json)?;
                return Ok(());
            }
            Step::NeedCrop {
                prediction_id,
                crop_count,
            } => {
                println!(
                    "The server needs a closer look at the leaf (crop {}/{}, prediction {}).",
                    crop_count,
                    session.max_crop_count(),
                    prediction_id
                );
                let outcome = {
                    let original = session
                        .original()
                        .ok_or_else(|| anyhow!("the original capture is gone"))?;
                    negotiate_crop(original, cfg, args, round)?
                };
                let Some(outcome) = outcome else {
                    session.cancel()?;
                    println!("Cancelled.");
                    return Ok(());
                };
                round += 1;
                let (ticket, request) = session.begin_crop(&outcome)?;
                drop(outcome);
                let (returned, result) =
                    match dispatch(client, ui, "Diagnosing crop", &signal, move |c| {
                        c.predict_crop(&request)
                    })? {
                        Some(done) => done,
                        None => {
                            session.abort()?;
                            println!("Cancelled.");
                            return Ok(());
                        }
                    };
                client = returned;
                step = match session.complete(ticket, result) {
                    Ok(step) => step,
                    Err(err) => retry_crop_after(&session, err, interactive)?,
                };
            }
        }
    }
}

/// Decide whether a failed crop round can be retried.
///
/// Only an interactive user gets another attempt, on the same prediction and
/// crop round; scripted crops would just fail the same way again.
fn retry_crop_after(
    session: &PredictionSession,
    err: ClientError,
    interactive: bool,
) -> Result<Step> {
    match session.state() {
        SessionState::NeedCrop {
            prediction_id,
            crop_count,
        } if interactive && !err.requires_login() => {
            eprintln!("{}", err.user_message());
            eprintln!("Adjust the crop and try again, or enter q to give up.");
            Ok(Step::NeedCrop {
                prediction_id: prediction_id.clone(),
                crop_count: *crop_count,
            })
        }
        _ => Err(err.into()),
    }
}

/// Ctrl-C handling: an armed signal aborts the in-flight request, otherwise
/// the process exits.
#[derive(Debug, Default)]
struct AbortSignal {
    armed: AtomicBool,
    requested: AtomicBool,
}

impl AbortSignal {
    fn arm(&self) -> ArmedSignal<'_> {
        self.requested.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
        ArmedSignal(self)
    }

    /// Returns false when nothing is in flight.
    fn interrupt(&self) -> bool {
        if !self.armed.load(Ordering::SeqCst) {
            return false;
        }
        self.requested.store(true, Ordering::SeqCst);
        true
    }

    fn requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

struct ArmedSignal<'a>(&'a AbortSignal);

impl Drop for ArmedSignal<'_> {
    fn drop(&mut self) {
        self.0.armed.store(false, Ordering::SeqCst);
    }
}

/// Run one prediction request on a worker thread so Ctrl-C can abandon it.
///
/// Returns `None` when aborted; the worker and its late answer are dropped.
fn dispatch<F>(
    mut client: ApiClient,
    ui: &Ui,
    stage_name: &str,
    signal: &AbortSignal,
    call: F,
) -> Result<Option<(ApiClient, ClientResult<PredictionResponse>)>>
where
    F: FnOnce(&mut ApiClient) -> ClientResult<PredictionResponse> + Send + 'static,
{
    let _armed = signal.arm();
    let stage = ui.stage(stage_name);
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = call(&mut client);
        let _ = tx.send((client, result));
    });
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok((client, result)) => {
                if let Err(err) = &result {
                    stage.fail(&err.user_message());
                }
                return Ok(Some((client, result)));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if signal.requested() {
                    stage.fail("aborted");
                    return Ok(None);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                stage.fail("worker stopped");
                return Err(anyhow!("prediction worker stopped unexpectedly"));
            }
        }
    }
}

fn acquire_image(cfg: &ClientConfig, ui: &Ui, args: &PredictArgs) -> Result<RawImage> {
    if let Some(path) = &args.file {
        let _stage = ui.stage("Reading image");
        return Ok(FileSource::new(cfg.file_config()).load(path)?);
    }
    let mut camera_cfg = cfg.camera.clone();
    camera_cfg.facing = if args.front {
        Facing::Front
    } else {
        Facing::Back
    };
    let _stage = ui.stage("Capturing");
    let mut camera = match CameraSource::open(camera_cfg) {
        Ok(camera) => camera,
        Err(err @ (ClientError::Permission(_) | ClientError::CameraUnavailable(_))) => {
            eprintln!("{}", err.user_message());
            eprintln!("Use --file <path> to upload a photo instead.");
            return Err(err.into());
        }
        Err(err) => return Err(err.into()),
    };
    let image = camera.capture()?;
    camera.close();
    Ok(image)
}

/// Crops come from the prompt only without `--crop`/`--auto-crop` and with a terminal.
fn crop_is_interactive(args: &PredictArgs) -> bool {
    args.crops.is_empty() && !args.auto_crop && std::io::stdin().is_terminal()
}

/// Produce the crop for this round, or `None` if the user gave up.
fn negotiate_crop(
    original: &RawImage,
    cfg: &ClientConfig,
    args: &PredictArgs,
    round: usize,
) -> Result<Option<CropOutcome>> {
    let aspect = if args.crops.is_empty() {
        AspectRatio::SQUARE
    } else {
        AspectRatio::Free
    };
    let mut negotiator = CropNegotiator::new(original, CROP_VIEWPORT, aspect)?
        .with_output_edge(cfg.capture.crop_output_edge);

    if let Some([x, y, w, h]) = args.crops.get(round).copied() {
        let rect = CropRectangle::new(x, y, w, h, original.size())?;
        negotiator.select_original(&rect);
        return Ok(Some(negotiator.confirm()?));
    }
    if !args.crops.is_empty() {
        return Err(anyhow!(
            "the server asked for crop round {} but only {} --crop values were given",
            round + 1,
            args.crops.len()
        ));
    }
    if !crop_is_interactive(args) {
        let selection = negotiator.selection();
        let factor = AUTO_CROP_SHRINK.powi(round as i32);
        let (cx, cy) = selection.center();
        let (w, h) = (selection.width * factor, selection.height * factor);
        negotiator.set_selection(DisplayBox::new(cx - w / 2.0, cy - h / 2.0, w, h));
        return Ok(Some(negotiator.confirm()?));
    }
    interactive_crop(negotiator)
}

fn interactive_crop(mut negotiator: CropNegotiator<'_>) -> Result<Option<CropOutcome>> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        let rect = negotiator.crop_rectangle()?;
        println!(
            "Selection: {}x{} at ({}, {}) in original pixels; zoom {:.2}",
            rect.width(),
            rect.height(),
            rect.x(),
            rect.y(),
            negotiator.zoom_level()
        );
        print!("crop [enter=accept, m dx dy, r w h, z factor, p dx dy, s x y w h, q=cancel]> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next().transpose()? else {
            return Ok(None);
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        let numbers: Vec<f64> = words.iter().skip(1).filter_map(|w| w.parse().ok()).collect();
        match (words.first().copied(), numbers.as_slice()) {
            (None, _) => return Ok(Some(negotiator.confirm()?)),
            (Some("q"), _) => return Ok(None),
            (Some("m"), [dx, dy]) => negotiator.move_by(*dx, *dy),
            (Some("r"), [w, h]) => negotiator.resize_to(*w, *h),
            (Some("z"), [factor]) => negotiator.zoom_by(*factor),
            (Some("p"), [dx, dy]) => negotiator.pan_by(*dx, *dy),
            (Some("s"), [x, y, w, h]) => {
                match CropRectangle::from_fractional(*x, *y, *w, *h, negotiator.original_size()) {
                    Ok(rect) => negotiator.select_original(&rect),
                    Err(err) => println!("{}", err.user_message()),
                }
            }
            _ => println!("Unrecognized command."),
        }
    }
}

fn print_verdict(client: &ApiClient, verdict: &Verdict, json: bool) -> Result<()> {
    let resp = verdict.response();
    if json {
        println!("{}", serde_json::to_string_pretty(resp)?);
        return Ok(());
    }
    match verdict {
        Verdict::NotPlant(_) => {
            println!("This does not look like a plant leaf.");
            if let Some(message) = resp.error.as_deref().or(resp.message.as_deref()) {
                println!("{}", message);
            }
            return Ok(());
        }
        Verdict::CropLimitReached(_) => {
            println!("The server could not confirm a diagnosis after the allowed crop rounds.");
            println!("Try a closer, sharper photo of a single leaf.");
        }
        Verdict::Detected(_) => {}
    }
    print_response(client, resp);
    Ok(())
}

fn print_response(client: &ApiClient, resp: &PredictionResponse) {
    println!(
        "Diagnosis:  {}",
        resp.disease.as_deref().unwrap_or("unknown")
    );
    if let Some(confidence) = resp.confidence {
        println!("Confidence: {:.1}%", confidence * 100.0);
    }
    if let Some(severity) = &resp.severity {
        println!("Severity:   {}", severity);
    }
    if let Some(cnn) = &resp.cnn_result {
        let top: Vec<String> = cnn
            .ranked()
            .into_iter()
            .take(3)
            .map(|(class, score)| format!("{} {:.1}%", class, score * 100.0))
            .collect();
        if !top.is_empty() {
            println!("Classifier: {}", top.join(", "));
        }
    }
    if let Some(yolo) = &resp.yolo_result {
        for detection in &yolo.detections {
            match detection.bbox {
                Some([x1, y1, x2, y2]) => println!(
                    "Detected:   {} {:.1}% at ({:.0},{:.0})-({:.0},{:.0})",
                    detection.class,
                    detection.confidence * 100.0,
                    x1,
                    y1,
                    x2,
                    y2
                ),
                None => println!(
                    "Detected:   {} {:.1}%",
                    detection.class,
                    detection.confidence * 100.0
                ),
            }
        }
    }
    if let Some(url) = resp.predict_img_url.as_deref().or(resp.image_path.as_deref()) {
        println!("Image:      {}", client.resolve(url));
    }
    if let Some(ms) = resp.processing_time_ms {
        println!("Took:       {:.0} ms", ms);
    }
    if let Some(info) = &resp.disease_info {
        if let Some(description) = &info.description {
            println!();
            println!("{}", description);
        }
        for (title, items) in [
            ("Causes", &info.causes),
            ("Symptoms", &info.symptoms),
            ("Features", &info.features),
            ("Management", &info.management_measures),
            ("Pesticides", &info.pesticides),
            ("Prevention", &info.prevention_tips),
            ("References", &info.reference_links),
        ] {
            if items.is_empty() {
                continue;
            }
            println!();
            println!("{}:", title);
            for item in items {
                println!("  - {}", item);
            }
        }
    }
}

fn print_stats(stats: &UserStats) {
    println!("Total detections: {}", stats.total_detections);
    if !stats.disease_stats.is_empty() {
        println!("By disease:");
        let mut diseases: Vec<_> = stats.disease_stats.iter().collect();
        diseases.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (disease, count) in diseases {
            println!("  {:<32} {}", disease, count);
        }
    }
    if !stats.severity_stats.is_empty() {
        println!("By severity:");
        for (severity, count) in &stats.severity_stats {
            println!("  {:<32} {}", severity, count);
        }
    }
}

fn password_or_prompt(value: Option<String>, label: &str) -> Result<String> {
    if let Some(value) = value {
        return Ok(value);
    }
    eprint!("{}: ", label);
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(anyhow!("{} must not be empty", label.to_lowercase()));
    }
    Ok(password)
}

fn parse_crop_arg(value: &str) -> std::result::Result<[u32; 4], String> {
    let parts: Vec<u32> = value
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("crop must be x,y,width,height in pixels: {}", e))?;
    match parts.as_slice() {
        [x, y, w, h] if *w > 0 && *h > 0 => Ok([*x, *y, *w, *h]),
        [_, _, _, _] => Err("crop width and height must be positive".to_string()),
        _ => Err("crop must be x,y,width,height in pixels".to_string()),
    }
}

fn parse_sort_arg(value: &str) -> Result<(OrderBy, OrderDir)> {
    let (field, dir) = match value.split_once(':') {
        Some((field, dir)) => (field, dir.parse()?),
        None => (value, OrderDir::Desc),
    };
    Ok((field.parse()?, dir))
}
