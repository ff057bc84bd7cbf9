//! The pager mediates all access to pages and is the only owner of page
//! buffers. It performs read-through on first touch, explicit write-back on
//! flush, and never evicts; allocation is append-only.

use super::btree::PAGE_SIZE;
use crate::errors::Error;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::{debug, info, trace};

/// Hard cap on the number of pages a table may occupy.
pub const TABLE_MAX_PAGES: usize = 100;

/// A single 4 KiB page of data.
#[derive(Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    fn new() -> Box<Self> {
        Box::new(Page {
            data: [0; PAGE_SIZE],
        })
    }
}

pub struct Pager {
    file: File,
    /// Length of the file in bytes when it was opened.
    file_length: u64,
    /// Number of pages the pager knows about, cached or on disk.
    num_pages: u32,
    pages: heapless::Vec<Option<Box<Page>>, TABLE_MAX_PAGES>,
}

impl Pager {
    /// Opens (or creates, owner-readable/writable only) the database file.
    ///
    /// # Errors
    /// Returns `Error::Corrupt` if the file length is not a whole number of
    /// pages, `Error::Io` if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o600)
            .open(path)?;

        let file_length = file.metadata()?.len();
        if file_length % PAGE_SIZE as u64 != 0 {
            return Err(err!(
                Corrupt,
                "Database file is not a whole number of pages ({} bytes)",
                file_length
            ));
        }

        let num_pages = (file_length / PAGE_SIZE as u64) as u32;
        info!(
            path = %path.display(),
            file_length,
            num_pages,
            "Opened database file"
        );

        Ok(Pager {
            file,
            file_length,
            num_pages,
            pages: heapless::Vec::new(),
        })
    }

    /// Returns a mutable handle to page `page_num`, loading it from disk on
    /// first touch if the file covers it, otherwise zero-filled.
    ///
    /// # Errors
    /// Returns `Error::TableFull` when `page_num` is beyond the page budget.
    pub fn get_page(&mut self, page_num: u32) -> Result<&mut Page, Error> {
        if page_num as usize >= TABLE_MAX_PAGES {
            return Err(Error::TableFull);
        }
        while self.pages.len() <= page_num as usize {
            // Cannot overflow: len stays below TABLE_MAX_PAGES here.
            let _ = self.pages.push(None);
        }

        if self.pages[page_num as usize].is_none() {
            // Cache miss. Allocate a zeroed buffer and load from file.
            let mut page = Page::new();
            let mut pages_on_disk = self.file_length / PAGE_SIZE as u64;
            if self.file_length % PAGE_SIZE as u64 != 0 {
                // We might save a partial page at the end of the file.
                pages_on_disk += 1;
            }
            if (page_num as u64) < pages_on_disk {
                self.file
                    .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
                let mut filled = 0;
                while filled < PAGE_SIZE {
                    let read = self.file.read(&mut page.data[filled..])?;
                    if read == 0 {
                        break;
                    }
                    filled += read;
                }
                trace!(page_num, bytes = filled, "Loaded page from disk");
            }
            self.pages[page_num as usize] = Some(page);
            if page_num >= self.num_pages {
                self.num_pages = page_num + 1;
            }
        }

        // Safe to unwrap: the slot was filled above if it was empty.
        Ok(self.pages[page_num as usize].as_mut().unwrap())
    }

    /// For now, we assume that in a database with N pages, page numbers 0
    /// through N-1 are allocated, so we can always hand out page number N.
    /// Without deletion there are never free pages to reuse.
    pub fn get_unused_page_num(&self) -> u32 {
        self.num_pages
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Writes exactly `PAGE_SIZE` bytes of page `page_num` back to the file.
    ///
    /// # Errors
    /// Returns `Error::Storage` if the slot is not resident; flushing a page
    /// that was never touched is a caller bug.
    pub fn flush(&mut self, page_num: u32) -> Result<(), Error> {
        let page = self
            .pages
            .get(page_num as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| err!(Storage, "Tried to flush a non-resident page {}", page_num))?;

        self.file
            .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(&page.data)?;
        trace!(page_num, "Flushed page");
        Ok(())
    }

    /// Flushes every resident page and releases its buffer, then syncs the
    /// file. File growth happens here, never in `get_page`.
    pub fn close(&mut self) -> Result<(), Error> {
        let mut flushed = 0;
        for i in 0..self.pages.len() {
            if self.pages[i].is_some() {
                self.flush(i as u32)?;
                self.pages[i] = None;
                flushed += 1;
            }
        }
        self.file.sync_all()?;
        debug!(flushed, "Closed pager");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn open_empty_file_has_no_pages() {
        let file = NamedTempFile::new().unwrap();
        let pager = Pager::open(file.path()).unwrap();
        assert_eq!(pager.num_pages(), 0);
        assert_eq!(pager.get_unused_page_num(), 0);
    }

    #[test]
    fn partial_page_file_is_corrupt() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), vec![0u8; PAGE_SIZE + 1]).unwrap();
        assert!(matches!(
            Pager::open(file.path()),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn get_page_grows_num_pages_but_not_the_file() {
        let file = NamedTempFile::new().unwrap();
        let mut pager = Pager::open(file.path()).unwrap();

        pager.get_page(0).unwrap();
        pager.get_page(3).unwrap();
        assert_eq!(pager.num_pages(), 4);
        assert_eq!(file.path().metadata().unwrap().len(), 0);
    }

    #[test]
    fn flush_writes_exactly_one_page() {
        let file = NamedTempFile::new().unwrap();
        let mut pager = Pager::open(file.path()).unwrap();

        pager.get_page(0).unwrap().data[17] = 0xab;
        pager.flush(0).unwrap();
        let on_disk = std::fs::read(file.path()).unwrap();
        assert_eq!(on_disk.len(), PAGE_SIZE);
        assert_eq!(on_disk[17], 0xab);
    }

    #[test]
    fn flush_of_non_resident_page_is_a_storage_error() {
        let file = NamedTempFile::new().unwrap();
        let mut pager = Pager::open(file.path()).unwrap();
        assert!(matches!(pager.flush(0), Err(Error::Storage(_))));
    }

    #[test]
    fn page_budget_is_enforced() {
        let file = NamedTempFile::new().unwrap();
        let mut pager = Pager::open(file.path()).unwrap();
        assert!(matches!(
            pager.get_page(TABLE_MAX_PAGES as u32),
            Err(Error::TableFull)
        ));
    }

    #[test]
    fn close_persists_and_reload_reads_back() {
        let file = NamedTempFile::new().unwrap();
        {
            let mut pager = Pager::open(file.path()).unwrap();
            pager.get_page(0).unwrap().data[0] = 1;
            pager.get_page(1).unwrap().data[PAGE_SIZE - 1] = 2;
            pager.close().unwrap();
        }
        assert_eq!(
            file.path().metadata().unwrap().len(),
            2 * PAGE_SIZE as u64
        );

        let mut pager = Pager::open(file.path()).unwrap();
        assert_eq!(pager.num_pages(), 2);
        assert_eq!(pager.get_page(0).unwrap().data[0], 1);
        assert_eq!(pager.get_page(1).unwrap().data[PAGE_SIZE - 1], 2);
    }
}
