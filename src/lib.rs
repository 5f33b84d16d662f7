pub mod api;
pub mod blueprint;
pub mod captions;
pub mod chain;
pub mod compositor;
pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod init;
pub mod poller;
pub mod run;
pub mod storage;
pub mod text_layout;
pub mod timeline;

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!("{}", message),
        _ => tracing::info!("[{}] {}", tag, message),
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}
