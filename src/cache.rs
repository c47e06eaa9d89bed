use std::{io::{Read, Seek, Write}, num::NonZero};

use lru::LruCache;

use crate::udf_parser::Result;

/// Fixed-capacity LRU block cache over a reader whose sector size is only
/// known at runtime (512/2048/4096/8192 depending on the media).
pub struct Cache<R: Read + Seek, const BYTE_SIZE: usize> {
    /// The cache data.
    data: [u8; BYTE_SIZE],
    lru_cache: lru::LruCache<u32, u32>,
    empty_blocks: Vec<u32>,
    reader: R,
    block_size: usize,
}
impl<R: Read + Seek, const BYTE_SIZE: usize> Cache<R, BYTE_SIZE>   {
    /// Create a new cache. `block_size` must evenly divide BYTE_SIZE.
    pub fn new(reader: R, block_size: usize) -> Cache<R, BYTE_SIZE> {
        let mut empty_blocks = Vec::with_capacity(BYTE_SIZE / block_size);
        for i in 0..BYTE_SIZE / block_size {
            empty_blocks.push(i as u32);
        }
        Cache {
            data: [0; BYTE_SIZE],
            lru_cache: LruCache::new(NonZero::new(empty_blocks.len()).unwrap()),
            empty_blocks,
            reader,
            block_size,
        }
    }
    fn ensure_empty_block(&mut self) -> u32 {
        if let Some(index) = self.empty_blocks.pop() {
            index
        } else {
            let (_old_block, index) = self.lru_cache.pop_lru().unwrap();
            index
        }
    }
    pub fn read_exact(&mut self, pos: usize, buf: &mut [u8]) -> Result<()> {
        let end_pos = pos + buf.len();
        let mut read = 0;
        while read < buf.len() {
            let pos_this_read = pos + read;
            let block = pos_this_read / self.block_size;
            let offset = pos_this_read % self.block_size;
            let end_pos_this_read = end_pos.min((block + 1) * self.block_size);
            let len = end_pos_this_read - pos_this_read;
            let data = self.read_block(block as u32)?;
            buf[read..read + len].copy_from_slice(&data[offset..offset + len]);
            read += len;
        }
        Ok(())
    }
    pub fn read_block(&mut self, block: u32) -> Result<&[u8]> {
        let block_size = self.block_size;
        let existing = self.lru_cache.get(&block);
        if let Some(&index) = existing {
            let start = index as usize * block_size;
            Ok(&self.data[start..start + block_size])
        } else {
            let index = self.ensure_empty_block();
            let buf = &mut self.data[index as usize * block_size..(index + 1) as usize * block_size];
            buf.fill(0);
            match (|| -> Result<()> {
                self.reader.seek(std::io::SeekFrom::Start(block as u64 * block_size as u64))?;
                self.reader.read_exact(buf)?;
                Ok(())
            })() {
                Ok(()) => {
                    self.lru_cache.put(block, index);
                    Ok(buf)
                }
                Err(e) => {
                    self.empty_blocks.push(index);
                    Err(e)
                }
            }
        }
    }
}

impl<R: Read + Write + Seek, const BYTE_SIZE: usize> Cache<R, BYTE_SIZE> {
    /// Writes through to the underlying reader and drops any cached block the
    /// write touches, so a subsequent `read_block` re-fetches the new bytes
    /// instead of serving a stale copy.
    pub fn write_at(&mut self, pos: usize, buf: &[u8]) -> Result<()> {
        self.reader.seek(std::io::SeekFrom::Start(pos as u64))?;
        self.reader.write_all(buf)?;

        let block_size = self.block_size;
        let first_block = (pos / block_size) as u32;
        let last_block = ((pos + buf.len().saturating_sub(1)) / block_size) as u32;
        for block in first_block..=last_block {
            if let Some(&index) = self.lru_cache.peek(&block) {
                self.lru_cache.pop(&block);
                self.empty_blocks.push(index);
            }
        }
        Ok(())
    }
}
