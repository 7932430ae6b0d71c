//! Map serialization.
//!
//! - JSON files on disk, for the server's configured maps
//! - bincode snapshots, for shipping a whole map inside one protocol message

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::map::TileMap;
use crate::MapError;

pub fn read_map_file(path: impl AsRef<Path>) -> Result<TileMap, MapError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let map: TileMap = serde_json::from_reader(reader)?;
    map.validate()?;
    log::debug!(
        "Read map {} ({}x{}, {} layers, {} tilesets)",
        path.display(),
        map.width,
        map.height,
        map.layer_count(),
        map.tilesets().len()
    );
    Ok(map)
}

pub fn write_map_file(path: impl AsRef<Path>, map: &TileMap) -> Result<(), MapError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, map)?;
    writer.flush()?;
    Ok(())
}

/// Encode a map into the compact binary snapshot format.
pub fn encode_map(map: &TileMap) -> Result<Vec<u8>, MapError> {
    Ok(bincode::serde::encode_to_vec(map, bincode::config::standard())?)
}

/// Decode and validate a binary snapshot.
pub fn decode_map(bytes: &[u8]) -> Result<TileMap, MapError> {
    let (map, _): (TileMap, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    map.validate()?;
    Ok(map)
}
