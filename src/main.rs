use driveguard::{
    camera::{DetectorPresence, FrameSource, LiveCapture, V4lCamera},
    common::{CameraConfig, DataPaths, ModelConfig},
    core::{largest_face, FaceServiceSlot},
    flows::{Attempt, CaptureSession, RegistrationFlow, VerificationFlow},
    monitor::{self, DrowsinessDetector, DrowsinessMonitor, LogNotifier},
    storage::{AccountRecord, AccountStore},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "driveguard")]
#[command(about = "Driver monitoring with face login")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    /// Model configuration file (defaults to the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default model configuration
    InitConfig,
    /// Create an account and register its face
    Enroll {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        phone: String,
        /// Re-register the face of an existing account
        #[arg(long)]
        update: bool,
        /// Use an image file instead of the camera
        #[arg(long)]
        image: Option<PathBuf>,
        /// Seconds to wait for a face
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Verify a face against one account
    Verify {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Face-only login: find the account matching the face
    Identify {
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
    /// Password login
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
    },
    /// Delete an account and its biometric data
    Delete {
        #[arg(short, long)]
        username: String,
    },
    /// Run the live guide and save each auto-capture
    Preview {
        #[arg(long, default_value = "20")]
        seconds: u64,
    },
    /// Watch the driver for signs of drowsiness
    Monitor {
        /// Stop after this many seconds (runs until the camera fails otherwise)
        #[arg(long)]
        seconds: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on mode
    setup_logging(cli.dev);

    let paths = DataPaths::new(cli.dev)?;
    let config_path = cli.config.clone().unwrap_or_else(|| paths.model_config_file());
    let config = ModelConfig::load_or_default(&config_path)?;
    let store = Arc::new(AccountStore::new(paths.accounts_file()));

    match cli.command {
        Commands::InitConfig => {
            config.save(&config_path)?;
            println!("Wrote {}", config_path.display());
        }
        Commands::Enroll {
            username,
            password,
            name,
            phone,
            update,
            image,
            timeout,
        } => {
            let slot = FaceServiceSlot::load(&config.face_recognition, &paths);
            let service = slot.get()?;
            let flow = RegistrationFlow::new(Arc::clone(&service), Arc::clone(&store));

            let account = if update {
                store
                    .authenticate_password(&username, &password)?
                    .context("Unknown username or wrong password")?
            } else {
                store.ensure_username_available(&username)?;
                let driver_id = store.next_driver_id()?;
                AccountRecord::new(username, password, name, phone, driver_id)
            };

            let registered = match image {
                Some(path) => {
                    let frame = load_frame(&path)?;
                    if cli.dev {
                        save_annotated(&paths, &service, &frame, "enroll");
                    }
                    flow.register(&frame, account)?
                }
                None => {
                    let session = CaptureSession::new(config.capture_guide.clone(), Duration::from_secs(timeout));
                    let presence =
                        DetectorPresence::new(Arc::clone(&service), config.capture_guide.oval_margin);
                    let result = session.run(
                        camera_opener(&config.camera),
                        presence,
                        preview_sink,
                        move |frame: &RgbImage| {
                            flow.register(frame, account.clone())
                                .map(Attempt::Done)
                                .map_err(Into::into)
                        },
                    )?;
                    match result {
                        Some(account) => account,
                        None => bail!("No face captured within {}s", timeout),
                    }
                }
            };
            println!(
                "Registered face for {} ({})",
                registered.username, registered.driver_id
            );
        }
        Commands::Verify {
            username,
            password,
            image,
            timeout,
        } => {
            let service = FaceServiceSlot::load(&config.face_recognition, &paths).get()?;
            let flow = VerificationFlow::new(service.clone(), Arc::clone(&store));

            let result = match image {
                Some(path) => Some(flow.verify_face(&load_frame(&path)?, &username, &password)?),
                None => {
                    let session = CaptureSession::new(config.capture_guide.clone(), Duration::from_secs(timeout));
                    let presence =
                        DetectorPresence::new(Arc::clone(&service), config.capture_guide.oval_margin);
                    session.run(
                        camera_opener(&config.camera),
                        presence,
                        preview_sink,
                        move |frame: &RgbImage| {
                            flow.verify_face(frame, &username, &password).map(Attempt::Done)
                        },
                    )?
                }
            };

            match result {
                Some(r) if r.matched => println!("Match (similarity {:.4})", r.similarity),
                Some(r) => {
                    println!("No match (similarity {:.4})", r.similarity);
                    if let Some(reason) = r.rejection {
                        println!("Reason: {:?}", reason);
                    }
                    std::process::exit(1);
                }
                None => bail!("No face captured within {}s", timeout),
            }
        }
        Commands::Identify { image, timeout } => {
            let service = FaceServiceSlot::load(&config.face_recognition, &paths).get()?;
            let flow = VerificationFlow::new(service.clone(), Arc::clone(&store));

            let found = match image {
                Some(path) => flow.identify_face(&load_frame(&path)?)?,
                None => {
                    let session = CaptureSession::new(config.capture_guide.clone(), Duration::from_secs(timeout));
                    let presence =
                        DetectorPresence::new(Arc::clone(&service), config.capture_guide.oval_margin);
                    session.run(
                        camera_opener(&config.camera),
                        presence,
                        preview_sink,
                        move |frame: &RgbImage| {
                            Ok(match flow.identify_face(frame)? {
                                Some(found) => Attempt::Done(found),
                                None => Attempt::Retry,
                            })
                        },
                    )?
                }
            };

            match found {
                Some(found) => println!(
                    "Welcome {} ({}), similarity {:.4}",
                    found.account.name, found.account.driver_id, found.similarity
                ),
                None => {
                    println!("Face not recognised");
                    std::process::exit(1);
                }
            }
        }
        Commands::Login { username, password } => match store.authenticate_password(&username, &password)? {
            Some(account) => println!(
                "Welcome {} ({}), face registered: {}",
                account.name,
                account.driver_id,
                account.is_enrolled()
            ),
            None => {
                println!("Wrong username or password");
                std::process::exit(1);
            }
        },
        Commands::Delete { username } => {
            store.delete_user(&username)?;
            println!("Deleted {}", username);
        }
        Commands::Preview { seconds } => {
            let service = FaceServiceSlot::load(&config.face_recognition, &paths).get()?;
            let presence = DetectorPresence::new(Arc::clone(&service), config.capture_guide.oval_margin);
            let capture_paths = paths.clone();

            let capture = LiveCapture::start(
                camera_opener(&config.camera),
                presence,
                &config.capture_guide,
                preview_sink,
                move |frame, handle| {
                    let path = capture_paths.capture_path("preview");
                    match frame.save(&path) {
                        Ok(()) => println!("Captured {}", path.display()),
                        Err(e) => tracing::warn!("Failed to save capture: {}", e),
                    }
                    handle.reset_capture();
                },
            )?;
            std::thread::sleep(Duration::from_secs(seconds));
            capture.stop();
        }
        Commands::Monitor { seconds } => {
            let drowsy = &config.drowsiness_detection;
            let detector = DrowsinessDetector::load(
                drowsy,
                &paths.resolve_model(&drowsy.model_path),
                config.face_recognition.optimization_level,
            )?;
            let mut camera = V4lCamera::open(&config.camera)?;
            let mut alerts = DrowsinessMonitor::new(Duration::from_millis(drowsy.alert_after_ms));
            let mut notifier = LogNotifier;

            let running = Arc::new(AtomicBool::new(true));
            if let Some(seconds) = seconds {
                let running = Arc::clone(&running);
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_secs(seconds));
                    running.store(false, Ordering::SeqCst);
                });
            }

            println!("Monitoring driver...");
            let frames = monitor::watch(
                &mut camera,
                &detector,
                &mut alerts,
                &mut notifier,
                &running,
                Duration::from_millis(config.capture_guide.frame_interval_ms),
            );
            println!("Processed {} frames", frames);
        }
    }

    Ok(())
}

fn camera_opener(
    camera: &CameraConfig,
) -> impl FnOnce() -> driveguard::Result<Box<dyn FrameSource>> + Send + 'static {
    let camera = camera.clone();
    move || V4lCamera::open(&camera).map(|c| Box::new(c) as Box<dyn FrameSource>)
}

fn preview_sink(frame: String) {
    tracing::trace!("Preview frame ({} bytes)", frame.len());
}

fn load_frame(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(image.to_rgb8())
}

/// Dev mode: keep a copy of the frame with the chosen face outlined.
fn save_annotated(paths: &DataPaths, service: &driveguard::FaceService, frame: &RgbImage, prefix: &str) {
    let mut annotated = frame.clone();
    let detections = service.detect(frame);
    if let Some(face) = largest_face(&detections) {
        let rect = Rect::at(face.bbox.x as i32, face.bbox.y as i32)
            .of_size(face.bbox.width.max(1.0) as u32, face.bbox.height.max(1.0) as u32);
        draw_hollow_rect_mut(&mut annotated, rect, Rgb([0, 255, 0]));
    }
    let path = paths.capture_path(prefix);
    match annotated.save(&path) {
        Ok(()) => tracing::debug!("Saved annotated capture to {}", path.display()),
        Err(e) => tracing::warn!("Failed to save annotated capture: {}", e),
    }
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
