use std::error::Error;
use std::cmp::PartialEq;
use std::default::Default;

use bytes::BytesMut;
use postgres_types::{to_sql_checked, Type, IsNull, ToSql};
use serde_repr::{Serialize_repr, Deserialize_repr};

pub type Offset = u32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq,
    Serialize_repr, Deserialize_repr
)]
#[repr(u8)]
pub enum Limit {
    Small = 25,
    Medium = 50,
    Large = 100
}

impl Limit {
    pub fn as_usize(&self) -> usize {
        *self as usize
    }

    pub fn sql_offset(&self, offset: Offset) -> i64 {
        (*self as i64) * (offset as i64)
    }
}

impl Default for Limit {
    fn default() -> Limit {
        Limit::Small
    }
}

impl ToSql for Limit {
    fn to_sql(&self, ty: &Type, w: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        let v = *self as i64;

        v.to_sql(ty, w)
    }

    fn accepts(ty: &Type) -> bool {
        <i64 as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

/// a page request. `offset` counts pages, not rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Limit,
    pub offset: Offset,
}

impl PageRequest {
    pub fn new(limit: Limit, offset: Offset) -> Self {
        PageRequest { limit, offset }
    }

    pub fn first(limit: Limit) -> Self {
        PageRequest { limit, offset: 0 }
    }

    pub fn next(&self) -> Self {
        PageRequest {
            limit: self.limit,
            offset: self.offset + 1,
        }
    }

    /// number of rows to skip
    pub fn skip(&self) -> usize {
        self.limit.sql_offset(self.offset) as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn page_offsets() {
        let page = PageRequest::first(Limit::Medium);

        assert_eq!(page.skip(), 0);
        assert_eq!(page.next().skip(), 50);
        assert_eq!(page.next().next().skip(), 100);
        assert_eq!(Limit::default().as_usize(), 25);
    }
}
