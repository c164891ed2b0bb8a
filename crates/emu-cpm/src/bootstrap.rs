//! Sample-file bootstrap for freshly formatted images.
//!
//! When drive A has no host image, it is seeded with a few text files and
//! two tiny COM programs so DIR, TYPE, and program loading have something
//! to work with out of the box.
//!
//! Layout written here: directory at track 0 sector 1, data blocks
//! allocated sequentially from block 1 (block N lives on track N + 1,
//! eight 128-byte records per block).

use format_cpm_dsk::{DirEntry, DiskImage, SECTOR_SIZE, entry_offset};

/// Text-file EOF filler.
const EOF_BYTE: u8 = 0x1A;

const WELCOME_TXT: &str = "WELCOME TO CP/M 2.2\r\n\
\r\n\
THIS DISK WAS CREATED BY THE EMULATOR BOOTSTRAP.\r\n\
TYPE \"DIR\" TO LIST FILES AND \"TYPE HELP.TXT\" FOR MORE.\r\n";

const HELP_TXT: &str = "QUICK REFERENCE\r\n\
\r\n\
DIR        LIST THE DIRECTORY\r\n\
TYPE F.X   SHOW A TEXT FILE\r\n\
ERA F.X    DELETE A FILE\r\n\
REN N=O    RENAME A FILE\r\n\
HELLO      RUN THE HELLO PROGRAM\r\n\
PLOP       RUN THE PLOP PROGRAM\r\n";

const README_TXT: &str = "THIS IS A SINGLE-DENSITY 8 INCH DISKETTE IMAGE:\r\n\
77 TRACKS OF 26 SECTORS OF 128 BYTES.\r\n\
THE DIRECTORY HOLDS 64 ENTRIES OF 32 BYTES.\r\n";

/// BDOS print-string program: MVI C,9; LXI D,0109; CALL 0005; HLT; text.
fn print_program(text: &[u8]) -> Vec<u8> {
    let mut com = vec![0x0E, 0x09, 0x11, 0x09, 0x01, 0xCD, 0x05, 0x00, 0x76];
    com.extend_from_slice(text);
    com.push(b'$');
    com
}

/// The files the bootstrap seeds, as (name, extension) pairs.
pub const SAMPLE_FILES: [(&str, &str); 5] = [
    ("WELCOME", "TXT"),
    ("HELP", "TXT"),
    ("README", "TXT"),
    ("HELLO", "COM"),
    ("PLOP", "COM"),
];

fn sample_content(index: usize) -> Vec<u8> {
    match index {
        0 => WELCOME_TXT.as_bytes().to_vec(),
        1 => HELP_TXT.as_bytes().to_vec(),
        2 => README_TXT.as_bytes().to_vec(),
        3 => print_program(b"HELLO, WORLD!\r\n"),
        _ => print_program(b"PLOP!\r\n"),
    }
}

/// Seed a blank image with the sample files.
pub fn seed(image: &mut DiskImage) {
    let mut next_block: u8 = 1;

    for (slot, (name, ext)) in SAMPLE_FILES.iter().enumerate() {
        let content = sample_content(slot);
        let records: Vec<&[u8]> = content.chunks(SECTOR_SIZE).collect();

        let mut entry = DirEntry {
            user: 0,
            name: [b' '; 8],
            ext: [b' '; 3],
            extent: 0,
            reserved: [0; 2],
            record_count: records.len() as u8,
            allocation: [0; 16],
        };
        entry.name[..name.len()].copy_from_slice(name.as_bytes());
        entry.ext[..ext.len()].copy_from_slice(ext.as_bytes());

        for (r, chunk) in records.iter().enumerate() {
            let block_index = r / 8;
            if entry.allocation[block_index] == 0 {
                entry.allocation[block_index] = next_block;
                next_block += 1;
            }
            let mut sector = [EOF_BYTE; SECTOR_SIZE];
            sector[..chunk.len()].copy_from_slice(chunk);

            let track = entry.allocation[block_index] + 1;
            let sector_num = (r % 8) as u8 + 1;
            image.write_sector(track, sector_num, &sector);
        }

        image.splice(entry_offset(0, slot), &entry.to_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use format_cpm_dsk::detect_dir_base;

    #[test]
    fn seed_writes_all_sample_entries() {
        let mut image = DiskImage::new();
        seed(&mut image);

        for (slot, (name, ext)) in SAMPLE_FILES.iter().enumerate() {
            let entry =
                DirEntry::from_bytes(image.slice(entry_offset(0, slot), 32));
            assert_eq!(entry.user, 0);
            assert!(entry.record_count > 0);
            assert_ne!(entry.allocation[0], 0);
            assert_eq!(entry.display_name(), format!("{name}.{ext}"));
        }
    }

    #[test]
    fn seeded_directory_is_detected_at_offset_zero() {
        let mut image = DiskImage::new();
        seed(&mut image);
        assert_eq!(detect_dir_base(&image), 0);
    }

    #[test]
    fn files_get_distinct_blocks() {
        let mut image = DiskImage::new();
        seed(&mut image);

        let mut seen = Vec::new();
        for slot in 0..SAMPLE_FILES.len() {
            let entry =
                DirEntry::from_bytes(image.slice(entry_offset(0, slot), 32));
            for &block in entry.allocation.iter().filter(|&&b| b != 0) {
                assert!(!seen.contains(&block), "block {block} allocated twice");
                seen.push(block);
            }
        }
    }

    #[test]
    fn file_content_lands_on_its_block_track() {
        let mut image = DiskImage::new();
        seed(&mut image);

        // WELCOME.TXT is slot 0, block 1, so its first record is at
        // track 2 sector 1.
        let entry = DirEntry::from_bytes(image.slice(entry_offset(0, 0), 32));
        assert_eq!(entry.allocation[0], 1);
        let sector = image.read_sector(2, 1).expect("track 2 sector 1");
        assert!(sector.starts_with(b"WELCOME TO CP/M 2.2\r\n"));
    }

    #[test]
    fn com_programs_print_via_bdos_9() {
        let com = sample_content(3);
        // MVI C,9 / LXI D,0109 / CALL 0005 / HLT
        assert_eq!(&com[..9], &[0x0E, 0x09, 0x11, 0x09, 0x01, 0xCD, 0x05, 0x00, 0x76]);
        assert!(com.ends_with(b"HELLO, WORLD!\r\n$"));
        // Message text sits at COM offset 9 = guest address 0x0109.
        assert_eq!(com[9], b'H');
    }
}
