use canopy_api::ErrorKind;

pub type BoxDynError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    cxt: Option<String>,
    src: Option<BoxDynError>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new() -> Error {
        Error {
            kind: ErrorKind::InternalFailure,
            cxt: None,
            src: None,
        }
    }

    pub fn not_found<C>(cxt: C) -> Error
    where
        C: Into<String>
    {
        Error::new().kind(ErrorKind::NotFound).context(cxt)
    }

    pub fn permission_denied<C>(cxt: C) -> Error
    where
        C: Into<String>
    {
        Error::new().kind(ErrorKind::PermissionDenied).context(cxt)
    }

    pub fn conflict<C>(cxt: C) -> Error
    where
        C: Into<String>
    {
        Error::new().kind(ErrorKind::Conflict).context(cxt)
    }

    pub fn invalid_state<C>(cxt: C) -> Error
    where
        C: Into<String>
    {
        Error::new().kind(ErrorKind::InvalidState).context(cxt)
    }

    pub fn transient<C>(cxt: C) -> Error
    where
        C: Into<String>
    {
        Error::new().kind(ErrorKind::Transient).context(cxt)
    }

    pub fn kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn context<C>(mut self, cxt: C) -> Self
    where
        C: Into<String>
    {
        self.cxt = Some(cxt.into());
        self
    }

    pub fn source<S>(mut self, src: S) -> Self
    where
        S: Into<BoxDynError>
    {
        self.src = Some(src.into());
        self
    }

    pub fn error_kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn get_context(&self) -> Option<&str> {
        self.cxt.as_deref()
    }
}

impl Default for Error {
    fn default() -> Self {
        Error::new()
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.kind, &self.cxt, &self.src) {
            (kind, Some(cxt), Some(err)) => if f.alternate() {
                write!(f, "{kind}: {cxt}\nerr: {err:#?}")
            } else {
                write!(f, "{kind}: {cxt}\nerr: {err}")
            },
            (kind, Some(cxt), None) => write!(f, "{kind}: {cxt}"),
            (kind, None, Some(err)) => if f.alternate() {
                write!(f, "{kind}\nerr: {err:#?}")
            } else {
                write!(f, "{kind}\nerr: {err}")
            },
            (kind, None, None) => write!(f, "{kind}")
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.src.as_ref().map(|v| & **v as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new().kind(kind)
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::new()
            .context(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::new()
            .context(msg)
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        if crate::sql::is_transient(&err) {
            Error::new()
                .kind(ErrorKind::Transient)
                .context("database unavailable")
                .source(err)
        } else {
            Error::new()
                .source(err)
        }
    }
}

impl From<deadpool_postgres::BuildError> for Error {
    fn from(err: deadpool_postgres::BuildError) -> Self {
        use deadpool_postgres::BuildError;

        match err {
            BuildError::Backend(e) => Self::from(e),
            BuildError::NoRuntimeSpecified(string) => Error::new()
                .context("failed to build database pool")
                .source(string)
        }
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        use deadpool_postgres::PoolError;

        match err {
            PoolError::Backend(e) => Self::from(e),
            _ => Error::new()
                .kind(ErrorKind::Transient)
                .context("failed to retrieve database connection")
                .source(err)
        }
    }
}

macro_rules! simple_from {
    ($e:path) => {
        impl From<$e> for Error {
            fn from(err: $e) -> Self {
                Error::new()
                    .source(err)
            }
        }
    };
    ($e:path, $k:expr) => {
        impl From<$e> for Error {
            fn from(err: $e) -> Self {
                Error::new()
                    .kind($k)
                    .source(err)
            }
        }
    };
    ($e:path, $k:expr, $m:expr) => {
        impl From<$e> for Error {
            fn from(err: $e) -> Self {
                Error::new()
                    .kind($k)
                    .context($m)
                    .source(err)
            }
        }
    };
}

simple_from!(std::io::Error);
simple_from!(std::net::AddrParseError);
simple_from!(serde_json::Error);
simple_from!(serde_yaml::Error);
simple_from!(cron::error::Error);
simple_from!(
    reqwest::Error,
    ErrorKind::Transient,
    "external service request failed"
);
simple_from!(
    tokio::task::JoinError,
    ErrorKind::InternalFailure,
    "background task failed"
);

// ----------------------------------------------------------------------------

use canopy_lib::context_trait;

context_trait!(Error);

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<BoxDynError>
{
    fn context<C>(self, cxt: C) -> std::result::Result<T, Error>
    where
        C: Into<String>
    {
        match self {
            Ok(v) => Ok(v),
            Err(err) => Err(Error::new()
                .context(cxt)
                .source(err))
        }
    }
}

impl<T> Context<T, ()> for std::option::Option<T> {
    fn context<C>(self, cxt: C) -> std::result::Result<T, Error>
    where
        C: Into<String>
    {
        match self {
            Some(v) => Ok(v),
            None => Err(Error::new()
                .context(cxt))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_keeps_kind() {
        let err = Error::not_found("node \"abc\" was not found");

        assert_eq!(err.error_kind(), ErrorKind::NotFound);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "NotFound: node \"abc\" was not found");
    }

    #[test]
    fn transient_is_retryable() {
        let err = Error::transient("lock timeout");

        assert!(err.is_retryable());
    }

    #[test]
    fn context_on_option() {
        let missing: Option<i32> = None;
        let err = missing.context("nothing here").unwrap_err();

        assert_eq!(err.get_context(), Some("nothing here"));
        assert_eq!(err.error_kind(), ErrorKind::InternalFailure);
    }
}
