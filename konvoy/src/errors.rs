use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {

    #[error("manifest not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("invalid manifest {}: {reason}", .path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    /* every offending field, plus the raw validation output */
    #[error("manifest does not match the schema:\n  - {}\n{message}", .violations.join("\n  - "))]
    Schema { violations: Vec<String>, message: String },

    #[error("unable to interpolate `{value}`: variable `{variable}` is not defined")]
    Interpolation { value: String, variable: String },

    #[error("app '{0}' is routable but has no PORT in its env")]
    MissingPort(String),

    #[error("app '{0}' has no image to deploy")]
    MissingImage(String),

    /* encapsulate a kube-rust error */
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("cluster error: {0}")]
    Cluster(String),

    #[error("`{0}`")]
    Other(String),
}

impl Error {

    /*
     * Fatal errors abort the run before anything is mutated; the others are
     * reported against one app and processing carries on.
     */
    pub fn is_fatal(&self) -> bool {
	matches!(self,
		 Error::ManifestNotFound(_)
		 | Error::InvalidManifest { .. }
		 | Error::Schema { .. }
		 | Error::Interpolation { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
