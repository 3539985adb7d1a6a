use thiserror::Error;

/// Fatal conditions of a training or generation run.
///
/// Everything else in the workspace returns `anyhow::Result`; these
/// variants travel inside it so a caller can `downcast_ref` and tell a
/// bad configuration from a diverged run.
#[derive(Debug, Error)]
pub enum PixelCnnError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("non-finite {stage} loss {value} at epoch {epoch}")]
    NonFinite {
        stage: &'static str,
        epoch: usize,
        value: f32,
    },

    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl PixelCnnError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn io<P: AsRef<std::path::Path>>(
        action: &'static str,
        path: P,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            action,
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// bail out with a configuration error
#[macro_export]
macro_rules! config_bail {
    ($($arg:tt)*) => {
        return Err($crate::errors::PixelCnnError::config(format!($($arg)*)).into())
    };
}
