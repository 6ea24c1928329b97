// Not every integration binary exercises every helper here
#![allow(dead_code)]

/// Mock drive infrastructure for testing wipe operations without hardware.
///
/// A mock drive is a temp file pre-filled with a recognizable byte pattern to
/// simulate a used device, plus a `Device` snapshot describing it. The mock
/// sector source simulates HPA/DCO state with clear operations that actually
/// mutate the counts (or lie, for trust-but-verify tests).
use std::io::{Seek, SeekFrom, Write};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use veriwipe::hidden::SectorCountSource;
use veriwipe::{Device, MediaClass};

pub struct MockDriveConfig {
    pub media_class: MediaClass,
    pub sectors: u64,
    pub sector_size: u32,
    pub is_system_disk: bool,
    /// Byte used to pre-fill the drive, simulating leftover data.
    pub fill_byte: u8,
}

impl Default for MockDriveConfig {
    fn default() -> Self {
        Self {
            media_class: MediaClass::Ssd,
            sectors: 256,
            sector_size: 512,
            is_system_disk: false,
            fill_byte: 0xAB,
        }
    }
}

pub struct MockDrive {
    pub config: MockDriveConfig,
    pub temp_file: NamedTempFile,
}

impl MockDrive {
    pub fn new(config: MockDriveConfig) -> std::io::Result<Self> {
        let mut temp_file = NamedTempFile::new()?;
        let size = config.sectors * config.sector_size as u64;
        let chunk = vec![config.fill_byte; 64 * 1024];

        let mut written = 0u64;
        while written < size {
            let n = chunk.len().min((size - written) as usize);
            temp_file.write_all(&chunk[..n])?;
            written += n as u64;
        }
        temp_file.flush()?;
        temp_file.seek(SeekFrom::Start(0))?;

        Ok(Self { config, temp_file })
    }

    pub fn ssd(sectors: u64) -> std::io::Result<Self> {
        Self::new(MockDriveConfig {
            sectors,
            ..Default::default()
        })
    }

    pub fn device(&self) -> Device {
        Device {
            path: self.temp_file.path().to_str().unwrap().to_string(),
            total_sectors: self.config.sectors,
            sector_size: self.config.sector_size,
            media_class: self.config.media_class,
            is_system_disk: self.config.is_system_disk,
            model: "MockDrive 1000".to_string(),
            serial: "MOCK-0001".to_string(),
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        std::fs::read(self.temp_file.path()).unwrap()
    }
}

/// Simulated platform sector-count binding.
pub struct MockSectorSource {
    counts: Mutex<(u64, u64, u64)>,
    pub lie_on_clear: bool,
}

impl MockSectorSource {
    pub fn new(native: u64, current: u64, physical: u64) -> Self {
        Self {
            counts: Mutex::new((native, current, physical)),
            lie_on_clear: false,
        }
    }

    /// Counts for a drive with nothing hidden.
    pub fn clean(sectors: u64) -> Self {
        Self::new(sectors, sectors, sectors)
    }
}

impl SectorCountSource for MockSectorSource {
    fn read_sector_counts(&self, _device: &Device) -> anyhow::Result<(u64, u64, u64)> {
        Ok(*self.counts.lock().unwrap())
    }

    fn clear_hpa(&self, _device: &Device) -> anyhow::Result<()> {
        if !self.lie_on_clear {
            let mut c = self.counts.lock().unwrap();
            c.1 = c.0;
        }
        Ok(())
    }

    fn clear_dco(&self, _device: &Device) -> anyhow::Result<()> {
        if !self.lie_on_clear {
            let mut c = self.counts.lock().unwrap();
            c.0 = c.2;
        }
        Ok(())
    }
}
