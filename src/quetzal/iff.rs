//! Minimal IFF container handling: one FORM, a flat list of chunks,
//! odd-length chunks padded with a zero byte.

use crate::error::{Error, Result};

pub struct IffChunk {
    pub chunk_type: [u8; 4],
    pub data: Vec<u8>,
}

pub struct IffForm {
    pub form_type: [u8; 4],
    pub chunks: Vec<IffChunk>,
}

impl IffForm {
    pub fn new(form_type: [u8; 4]) -> IffForm {
        IffForm {
            form_type,
            chunks: Vec::new(),
        }
    }

    pub fn add_chunk(&mut self, chunk_type: [u8; 4], data: Vec<u8>) {
        self.chunks.push(IffChunk { chunk_type, data });
    }

    pub fn find(&self, chunk_type: &[u8; 4]) -> Option<&IffChunk> {
        self.chunks.iter().find(|c| &c.chunk_type == chunk_type)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let content_size = 4 + self
            .chunks
            .iter()
            .map(|c| 8 + c.data.len() + c.data.len() % 2)
            .sum::<usize>();

        let mut out = Vec::with_capacity(content_size + 8);
        out.extend_from_slice(b"FORM");
        out.extend_from_slice(&(content_size as u32).to_be_bytes());
        out.extend_from_slice(&self.form_type);
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.chunk_type);
            out.extend_from_slice(&(chunk.data.len() as u32).to_be_bytes());
            out.extend_from_slice(&chunk.data);
            if chunk.data.len() % 2 == 1 {
                out.push(0);
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<IffForm> {
        if bytes.len() < 12 || &bytes[0..4] != b"FORM" {
            return Err(Error::BadSaveData("not an IFF form".into()));
        }
        let mut form_type = [0u8; 4];
        form_type.copy_from_slice(&bytes[8..12]);
        let mut form = IffForm::new(form_type);

        let mut offset = 12;
        while offset + 8 <= bytes.len() {
            let mut chunk_type = [0u8; 4];
            chunk_type.copy_from_slice(&bytes[offset..offset + 4]);
            let size = u32::from_be_bytes([
                bytes[offset + 4],
                bytes[offset + 5],
                bytes[offset + 6],
                bytes[offset + 7],
            ]) as usize;
            offset += 8;
            if offset + size > bytes.len() {
                return Err(Error::BadSaveData(format!(
                    "chunk {} runs past end of data",
                    String::from_utf8_lossy(&chunk_type)
                )));
            }
            form.chunks.push(IffChunk {
                chunk_type,
                data: bytes[offset..offset + size].to_vec(),
            });
            offset += size + size % 2;
        }
        Ok(form)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_with_odd_chunk() {
        let mut form = IffForm::new(*b"IFZS");
        form.add_chunk(*b"IFhd", vec![1, 2, 3]);
        form.add_chunk(*b"CMem", vec![4, 5]);
        let bytes = form.to_bytes();
        let back = IffForm::from_bytes(&bytes).unwrap();
        assert_eq!(back.form_type, *b"IFZS");
        assert_eq!(back.find(b"IFhd").unwrap().data, vec![1, 2, 3]);
        assert_eq!(back.find(b"CMem").unwrap().data, vec![4, 5]);
        assert!(back.find(b"Stks").is_none());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(IffForm::from_bytes(b"GARBAGE!").is_err());
    }
}
