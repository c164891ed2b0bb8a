//! Raw SSSD disk image: geometry and sector access.
//!
//! The on-media layout is linear: `(track × 26 + (sector − 1)) × 128`.
//! Sectors are numbered 1-26; tracks 0-76.

/// Tracks per disk.
pub const TRACKS: u8 = 77;

/// Sectors per track. Sector numbering starts at 1.
pub const SECTORS_PER_TRACK: u8 = 26;

/// Bytes per sector.
pub const SECTOR_SIZE: usize = 128;

/// Total image size: 77 × 26 × 128 = 256,256 bytes.
pub const IMAGE_SIZE: usize = TRACKS as usize * SECTORS_PER_TRACK as usize * SECTOR_SIZE;

/// Fill byte for unformatted space and deleted directory entries.
pub const FILL_BYTE: u8 = 0xE5;

/// A single-density CP/M disk image.
pub struct DiskImage {
    data: Vec<u8>,
}

impl DiskImage {
    /// Create a blank, unformatted image (all 0xE5).
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: vec![FILL_BYTE; IMAGE_SIZE],
        }
    }

    /// Wrap raw image bytes.
    ///
    /// # Errors
    ///
    /// Returns an error string unless the data is exactly 256,256 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, String> {
        if data.len() != IMAGE_SIZE {
            return Err(format!(
                "disk image must be exactly {IMAGE_SIZE} bytes, got {}",
                data.len()
            ));
        }
        Ok(Self {
            data: data.to_vec(),
        })
    }

    /// The raw image bytes, in on-media order.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Byte offset of a sector, or `None` for an address off the media.
    #[must_use]
    pub fn sector_offset(track: u8, sector: u8) -> Option<usize> {
        if track >= TRACKS || sector < 1 || sector > SECTORS_PER_TRACK {
            return None;
        }
        Some(
            (track as usize * SECTORS_PER_TRACK as usize + (sector as usize - 1)) * SECTOR_SIZE,
        )
    }

    /// Read a 128-byte sector.
    #[must_use]
    pub fn read_sector(&self, track: u8, sector: u8) -> Option<&[u8]> {
        let offset = Self::sector_offset(track, sector)?;
        Some(&self.data[offset..offset + SECTOR_SIZE])
    }

    /// Write a sector. Short data leaves the sector tail untouched.
    /// Returns true if the sector address was on the media.
    pub fn write_sector(&mut self, track: u8, sector: u8, data: &[u8]) -> bool {
        let Some(offset) = Self::sector_offset(track, sector) else {
            return false;
        };
        let len = data.len().min(SECTOR_SIZE);
        self.data[offset..offset + len].copy_from_slice(&data[..len]);
        true
    }

    /// Read a byte at an absolute image offset.
    #[must_use]
    pub fn peek(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    /// Copy `bytes` into the image at an absolute offset.
    pub fn splice(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Borrow a byte range at an absolute offset.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }
}

impl Default for DiskImage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_image_is_e5_filled() {
        let img = DiskImage::new();
        assert_eq!(img.as_bytes().len(), IMAGE_SIZE);
        assert!(img.as_bytes().iter().all(|&b| b == FILL_BYTE));
    }

    #[test]
    fn from_bytes_rejects_wrong_size() {
        assert!(DiskImage::from_bytes(&[0u8; 100]).is_err());
        assert!(DiskImage::from_bytes(&vec![0u8; IMAGE_SIZE]).is_ok());
    }

    #[test]
    fn sector_offset_formula() {
        assert_eq!(DiskImage::sector_offset(0, 1), Some(0));
        assert_eq!(DiskImage::sector_offset(0, 2), Some(128));
        assert_eq!(DiskImage::sector_offset(1, 1), Some(26 * 128));
        assert_eq!(DiskImage::sector_offset(2, 1), Some(2 * 26 * 128));
        assert_eq!(
            DiskImage::sector_offset(76, 26),
            Some(IMAGE_SIZE - SECTOR_SIZE)
        );
    }

    #[test]
    fn sector_zero_and_27_are_off_media() {
        assert_eq!(DiskImage::sector_offset(0, 0), None);
        assert_eq!(DiskImage::sector_offset(0, 27), None);
        assert_eq!(DiskImage::sector_offset(77, 1), None);
    }

    #[test]
    fn sector_roundtrip() {
        let mut img = DiskImage::new();
        let payload = [0xAAu8; SECTOR_SIZE];
        assert!(img.write_sector(5, 3, &payload));
        assert_eq!(img.read_sector(5, 3), Some(&payload[..]));
        // Neighbours untouched
        assert!(img.read_sector(5, 2).is_some_and(|s| s.iter().all(|&b| b == FILL_BYTE)));
        assert!(img.read_sector(5, 4).is_some_and(|s| s.iter().all(|&b| b == FILL_BYTE)));
    }

    #[test]
    fn write_off_media_is_rejected() {
        let mut img = DiskImage::new();
        assert!(!img.write_sector(0, 0, &[0u8; SECTOR_SIZE]));
        assert!(!img.write_sector(0, 27, &[0u8; SECTOR_SIZE]));
        assert!(img.as_bytes().iter().all(|&b| b == FILL_BYTE));
    }
}
