use std::error::Error;

use bytes::BytesMut;
use postgres_types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use serde::{Serialize, Deserialize};

use crate::validation::check_control_leading_trailing;

pub const MAX_BASENAME_CHARS: usize = 512;

pub const IMAGE_EXTENSIONS: [&str; 9] = [
    "jpeg", "jpg", "gif", "png", "svg", "bmp", "webp", "apng", "avif"
];

pub const ZIP_EXTENSION: &str = "zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(NodeKind::File),
            1 => Some(NodeKind::Directory),
            _ => None
        }
    }

    pub fn as_i16(&self) -> i16 {
        match self {
            NodeKind::File => 0,
            NodeKind::Directory => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "FILE",
            NodeKind::Directory => "DIRECTORY",
        }
    }

    pub fn from_str(v: &str) -> Option<Self> {
        match v {
            "FILE" => Some(NodeKind::File),
            "DIRECTORY" => Some(NodeKind::Directory),
            _ => None
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File)
    }
}

impl ToSql for NodeKind {
    fn to_sql(&self, ty: &Type, w: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        self.as_i16().to_sql(ty, w)
    }

    fn accepts(ty: &Type) -> bool {
        <i16 as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for NodeKind {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let v = <i16 as FromSql>::from_sql(ty, raw)?;

        NodeKind::from_i16(v).ok_or_else(|| format!("unknown node kind {v}").into())
    }

    fn accepts(ty: &Type) -> bool {
        <i16 as FromSql>::accepts(ty)
    }
}

fn valid_pathname_char(ch: &char) -> bool {
    !matches!(ch, '/' | '\\') && !ch.is_control()
}

pub fn basename_valid(given: &str) -> bool {
    !given.is_empty() &&
        given.chars().all(|ch| valid_pathname_char(&ch)) &&
        check_control_leading_trailing(given, Some(MAX_BASENAME_CHARS))
}

/// lowercase suffix after the last '.', None when there is no '.' or the
/// name ends with one
pub fn extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;

    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

pub fn is_image_name(name: &str) -> bool {
    let Some(ext) = extension(name) else {
        return false;
    };

    IMAGE_EXTENSIONS.contains(&ext.as_str())
}

pub fn is_zip_name(name: &str) -> bool {
    extension(name).as_deref() == Some(ZIP_EXTENSION)
}

/// name without its final extension. names without one (or that would be
/// left empty) are returned unchanged
pub fn stem(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name
    }
}

/// last path segment of an archive entry name. directory entries (trailing
/// separator) give None
pub fn entry_basename(entry: &str) -> Option<&str> {
    if entry.ends_with('/') || entry.ends_with('\\') {
        return None;
    }

    let name = entry.rsplit(|ch: char| ch == '/' || ch == '\\')
        .next()
        .unwrap_or(entry);

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
