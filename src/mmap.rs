use crate::util::{Word, WORD_SIZE};
use memmap2::MmapMut;
use std::io;

/// Anonymous mapping viewed as an array of words.
pub struct Mmap {
    map: MmapMut,
    words: usize,
}

impl Mmap {
    pub fn new(words: usize) -> io::Result<Self> {
        let map = MmapMut::map_anon(words * WORD_SIZE)?;
        #[cfg(unix)]
        unsafe {
            libc::madvise(
                map.as_ptr() as *mut libc::c_void,
                map.len(),
                libc::MADV_SEQUENTIAL,
            );
        }
        Ok(Self { map, words })
    }

    /// Size in words.
    pub const fn len(&self) -> usize {
        self.words
    }

    #[inline(always)]
    pub fn words(&self) -> &[Word] {
        // Anonymous mappings are page aligned and zero filled.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr().cast::<Word>(), self.words) }
    }

    #[inline(always)]
    pub fn words_mut(&mut self) -> &mut [Word] {
        unsafe {
            std::slice::from_raw_parts_mut(self.map.as_mut_ptr().cast::<Word>(), self.words)
        }
    }
}
