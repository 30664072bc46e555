//! Layer-name extraction from vector tile bodies.
//!
//! Metadata reconstruction for PBF sources needs the set of layer names.
//! Rather than decoding full vector tiles, this walks the protobuf wire
//! format just far enough: field 3 of the tile message is a layer, field 1
//! of a layer message is its name. Compressed bodies are inflated first.

use anyhow::{Context, Result, bail, ensure};
use flate2::read::{GzDecoder, ZlibDecoder};
use std::io::Read;

fn inflate_if_compressed(data: &[u8]) -> Result<Vec<u8>> {
	if data.starts_with(&[0x1F, 0x8B]) {
		let mut body = Vec::new();
		GzDecoder::new(data).read_to_end(&mut body).context("inflating gzip tile body")?;
		Ok(body)
	} else if data.starts_with(&[0x78, 0x9C]) {
		let mut body = Vec::new();
		ZlibDecoder::new(data)
			.read_to_end(&mut body)
			.context("inflating deflate tile body")?;
		Ok(body)
	} else {
		Ok(data.to_vec())
	}
}

struct PbfReader<'a> {
	data: &'a [u8],
	pos: usize,
}

impl<'a> PbfReader<'a> {
	fn new(data: &'a [u8]) -> PbfReader<'a> {
		PbfReader { data, pos: 0 }
	}

	fn at_end(&self) -> bool {
		self.pos >= self.data.len()
	}

	fn read_varint(&mut self) -> Result<u64> {
		let mut value = 0u64;
		let mut shift = 0u32;
		loop {
			ensure!(self.pos < self.data.len(), "truncated varint");
			ensure!(shift < 64, "varint too long");
			let byte = self.data[self.pos];
			self.pos += 1;
			value |= u64::from(byte & 0x7F) << shift;
			if byte & 0x80 == 0 {
				return Ok(value);
			}
			shift += 7;
		}
	}

	fn read_slice(&mut self, length: usize) -> Result<&'a [u8]> {
		ensure!(self.pos + length <= self.data.len(), "truncated length-delimited field");
		let slice = &self.data[self.pos..self.pos + length];
		self.pos += length;
		Ok(slice)
	}

	fn skip(&mut self, wire_type: u64) -> Result<()> {
		match wire_type {
			0 => {
				self.read_varint()?;
			}
			1 => {
				self.read_slice(8)?;
			}
			2 => {
				let length = self.read_varint()? as usize;
				self.read_slice(length)?;
			}
			5 => {
				self.read_slice(4)?;
			}
			_ => bail!("unsupported protobuf wire type {wire_type}"),
		}
		Ok(())
	}
}

fn layer_name(layer: &[u8]) -> Result<Option<String>> {
	let mut reader = PbfReader::new(layer);
	while !reader.at_end() {
		let key = reader.read_varint()?;
		let (field, wire_type) = (key >> 3, key & 7);
		if field == 1 && wire_type == 2 {
			let length = reader.read_varint()? as usize;
			let name = std::str::from_utf8(reader.read_slice(length)?).context("layer name is not UTF-8")?;
			return Ok(Some(name.to_string()));
		}
		reader.skip(wire_type)?;
	}
	Ok(None)
}

/// The layer names of one vector tile body, in file order.
pub fn layer_names(data: &[u8]) -> Result<Vec<String>> {
	let body = inflate_if_compressed(data)?;
	let mut reader = PbfReader::new(&body);
	let mut names = Vec::new();

	while !reader.at_end() {
		let key = reader.read_varint()?;
		let (field, wire_type) = (key >> 3, key & 7);
		if field == 3 && wire_type == 2 {
			let length = reader.read_varint()? as usize;
			if let Some(name) = layer_name(reader.read_slice(length)?)? {
				names.push(name);
			}
		} else {
			reader.skip(wire_type)?;
		}
	}

	Ok(names)
}

#[cfg(test)]
mod tests {
	use super::*;
	use flate2::{Compression, write::GzEncoder};
	use std::io::Write;

	/// A minimal tile message with the given layer names.
	fn tile_with_layers(names: &[&str]) -> Vec<u8> {
		let mut tile = Vec::new();
		for name in names {
			let mut layer = Vec::new();
			layer.push(0x0A); // field 1, wire type 2
			layer.push(name.len() as u8);
			layer.extend_from_slice(name.as_bytes());
			// version field, to exercise skipping: field 15, varint
			layer.push(0x78);
			layer.push(0x02);

			tile.push(0x1A); // field 3, wire type 2
			tile.push(layer.len() as u8);
			tile.extend_from_slice(&layer);
		}
		tile
	}

	#[test]
	fn plain_body() {
		let tile = tile_with_layers(&["water", "roads"]);
		assert_eq!(layer_names(&tile).unwrap(), vec!["water", "roads"]);
	}

	#[test]
	fn gzipped_body() {
		let tile = tile_with_layers(&["buildings"]);
		let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
		encoder.write_all(&tile).unwrap();
		let compressed = encoder.finish().unwrap();

		assert_eq!(layer_names(&compressed).unwrap(), vec!["buildings"]);
	}

	#[test]
	fn empty_and_truncated() {
		assert!(layer_names(&[]).unwrap().is_empty());
		assert!(layer_names(&[0x1A, 0xFF]).is_err());
	}
}
