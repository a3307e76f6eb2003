use tokio_postgres::{Error as PgError};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;

pub type ParamsVec<'a> = Vec<&'a (dyn ToSql + Sync)>;

pub fn push_param<'a, T>(params: &mut ParamsVec<'a>, v: &'a T) -> usize
where
    T: ToSql + Sync
{
    params.push(v);
    params.len()
}

pub fn unique_constraint_error(error: &PgError) -> Option<&str> {
    let Some(db_error) = error.as_db_error() else {
        return None;
    };

    if *db_error.code() == SqlState::UNIQUE_VIOLATION {
        db_error.constraint()
    } else {
        None
    }
}

/// connection loss, serialization failures and deadlocks are worth
/// retrying. conversion and column errors, and anything else the database
/// reported, are not
pub fn is_transient(error: &PgError) -> bool {
    let io = std::error::Error::source(error)
        .map(|source| source.is::<std::io::Error>())
        .unwrap_or(false);

    transient_failure(
        error.is_closed(),
        io,
        error.as_db_error().map(|db_error| db_error.code())
    )
}

fn transient_failure(closed: bool, io: bool, code: Option<&SqlState>) -> bool {
    if closed || io {
        return true;
    }

    let Some(code) = code else {
        return false;
    };

    *code == SqlState::T_R_SERIALIZATION_FAILURE ||
        *code == SqlState::T_R_DEADLOCK_DETECTED ||
        *code == SqlState::LOCK_NOT_AVAILABLE ||
        *code == SqlState::ADMIN_SHUTDOWN ||
        *code == SqlState::CANNOT_CONNECT_NOW
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transient_classes() {
        assert!(transient_failure(true, false, None));
        assert!(transient_failure(false, true, None));
        assert!(transient_failure(false, false, Some(&SqlState::T_R_DEADLOCK_DETECTED)));

        // conversion or column errors carry neither a db code nor io source
        assert!(!transient_failure(false, false, None));
        assert!(!transient_failure(false, false, Some(&SqlState::UNIQUE_VIOLATION)));
    }
}
