use std::error::Error;

use bytes::BytesMut;
use postgres_types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use serde::{Serialize, Deserialize};

use crate::validation::check_control_leading_trailing;

pub const MAX_NAME_CHARS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Folder,
    Gallery,
}

impl CollectionKind {
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(CollectionKind::Folder),
            1 => Some(CollectionKind::Gallery),
            _ => None
        }
    }

    pub fn as_i16(&self) -> i16 {
        match self {
            CollectionKind::Folder => 0,
            CollectionKind::Gallery => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Folder => "folder",
            CollectionKind::Gallery => "gallery",
        }
    }
}

impl ToSql for CollectionKind {
    fn to_sql(&self, ty: &Type, w: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.as_i16().to_sql(ty, w)
    }

    fn accepts(ty: &Type) -> bool {
        <i16 as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for CollectionKind {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let v = <i16 as FromSql>::from_sql(ty, raw)?;

        CollectionKind::from_i16(v).ok_or_else(|| format!("unknown collection kind {v}").into())
    }

    fn accepts(ty: &Type) -> bool {
        <i16 as FromSql>::accepts(ty)
    }
}

pub fn name_valid(given: &str) -> bool {
    !given.is_empty() && check_control_leading_trailing(given, Some(MAX_NAME_CHARS))
}
