// Sense Core - ambient sound safety monitoring
// Microphone frames -> sound-event model -> safety categories -> alerts

// Module declarations
pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod managers;
pub mod monitor;
pub mod settings;
pub mod telemetry;

// Re-exports for convenience
pub use analysis::{CategoryMapper, ClassificationResult, SoundCategory, SoundClassifier};
pub use audio::{AudioCapture, AudioFrame, MicrophoneDevice};
pub use config::AppConfig;
pub use error::{AudioError, ClassifierError, ErrorCode};
pub use managers::MonitorChannels;
pub use monitor::{
    AlertSink, DetectionPipeline, EventEmitter, Monitor, SimulatedMonitor, SoundEvent, WorkResult,
};
pub use settings::{MonitorSettings, SensitivityLevel, SettingsSource, SettingsStore};

cfg_if::cfg_if! {
    if #[cfg(target_os = "android")] {
        /// Route `tracing` output to logcat. Safe to call more than once.
        pub fn init_logging() {
            use tracing_subscriber::layer::SubscriberExt;
            use tracing_subscriber::util::SubscriberInitExt;

            match tracing_android::layer("SenseCore") {
                Ok(layer) => {
                    let _ = tracing_subscriber::registry().with(layer).try_init();
                }
                Err(err) => log::error!("Failed to create logcat layer: {}", err),
            }
        }
    } else {
        /// Install a stderr subscriber honoring `RUST_LOG`. Safe to call more
        /// than once.
        pub fn init_logging() {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

/// JNI_OnLoad is called when the native library is loaded by Android
/// This function initializes the Android context required by oboe-rs
#[cfg(target_os = "android")]
#[no_mangle]
pub extern "system" fn JNI_OnLoad(
    vm: jni::JavaVM,
    _reserved: *mut std::ffi::c_void,
) -> jni::sys::jint {
    init_logging();

    tracing::info!("[SenseCore] JNI_OnLoad called - initializing Android context");

    // SAFETY: the JavaVM pointer is valid for the lifetime of the process and
    // this runs before any Oboe stream is opened. No Context object exists
    // yet; Oboe only needs the VM to open input streams.
    unsafe {
        ndk_context::initialize_android_context(
            vm.get_java_vm_pointer().cast(),
            std::ptr::null_mut(),
        );
    }

    tracing::info!("[SenseCore] Android context initialized");
    jni::sys::JNI_VERSION_1_6
}
