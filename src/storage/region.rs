use super::page::PageLayout;

/// A file region: `count` repetitions of either a run of raw bytes (leaf)
/// or a sequence of child regions.
///
/// The region tree translates offsets in a virtual contiguous space (the
/// regions packed back to back with no padding) to physical offsets in the
/// backing file, where every leaf region starts on a page boundary. The
/// padding inserted by that alignment is exactly what keeps bytes of two
/// regions out of the same cache page.
#[derive(Debug, Clone)]
pub struct FileRegion {
    layout: PageLayout,
    count: u32,
    size: u64,
    children: Vec<FileRegion>,
    cache: Option<CanonicalCache>,
}

/// The precomputed shape of the canonical `info + N * (key + table)`
/// layout. Conversions hit this before falling back to the tree walk.
#[derive(Debug, Clone, Copy)]
struct CanonicalCache {
    raw: [u64; 3],
    aligned: [u64; 3],
}

impl FileRegion {
    pub fn leaf(layout: PageLayout, count: u32, size: u64) -> Self {
        FileRegion {
            layout,
            count,
            size,
            children: Vec::new(),
            cache: None,
        }
    }

    pub fn group(layout: PageLayout, count: u32, children: Vec<FileRegion>) -> Self {
        let mut region = FileRegion {
            layout,
            count,
            size: 0,
            children,
            cache: None,
        };
        region.cache = region.make_cache();
        region
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Recognize the canonical three-region shape:
    /// group(1, [leaf(1, info), group(n, [leaf(1, key), leaf(1, table)])]).
    fn make_cache(&self) -> Option<CanonicalCache> {
        if self.count != 1 || self.children.len() != 2 {
            return None;
        }
        let info = &self.children[0];
        let pairs = &self.children[1];
        if !info.is_leaf() || info.count != 1 || info.size == 0 {
            return None;
        }
        if pairs.is_leaf() || pairs.children.len() != 2 {
            return None;
        }
        let key = &pairs.children[0];
        let table = &pairs.children[1];
        if !key.is_leaf() || key.count != 1 || key.size == 0 {
            return None;
        }
        if !table.is_leaf() || table.count != 1 || table.size == 0 {
            return None;
        }
        let raw = [info.size, key.size, table.size];
        let aligned = [
            self.layout.align(info.size),
            self.layout.align(key.size),
            self.layout.align(table.size),
        ];
        Some(CanonicalCache { raw, aligned })
    }

    /// The raw size of one instance of the region.
    fn raw_instance(&self) -> u64 {
        if self.is_leaf() {
            self.size
        } else {
            self.children
                .iter()
                .map(|c| c.count as u64 * c.raw_instance())
                .sum()
        }
    }

    /// The physical size of one instance, every leaf padded to whole pages.
    fn aligned_instance(&self) -> u64 {
        if self.is_leaf() {
            self.layout.align(self.size)
        } else {
            self.children
                .iter()
                .map(|c| c.count as u64 * c.aligned_instance())
                .sum()
        }
    }

    /// Translate a logical offset to the physical offset in the file.
    pub fn convert_offset(&self, raw_offset: u64) -> u64 {
        if let Some(cache) = &self.cache {
            if raw_offset < cache.raw[0] {
                return self.layout.convert(raw_offset);
            }
            let rest = raw_offset - cache.raw[0];
            let pair_raw = cache.raw[1] + cache.raw[2];
            let n = rest / pair_raw;
            let rem = rest - n * pair_raw;
            let base = cache.aligned[0] + n * (cache.aligned[1] + cache.aligned[2]);
            if rem < cache.raw[1] {
                return base + self.layout.convert(rem);
            }
            return base + cache.aligned[1] + self.layout.convert(rem - cache.raw[1]);
        }
        self.do_convert_offset(raw_offset, 0)
    }

    fn do_convert_offset(&self, raw_offset: u64, phys_base: u64) -> u64 {
        let instance_raw = self.raw_instance();
        let instance_aligned = self.aligned_instance();
        let n = raw_offset / instance_raw;
        debug_assert!(n < self.count as u64, "offset beyond the region");
        let mut rem = raw_offset - n * instance_raw;
        let mut base = phys_base + n * instance_aligned;
        if self.is_leaf() {
            return base + self.layout.convert(rem);
        }
        for child in &self.children {
            let child_span = child.count as u64 * child.raw_instance();
            if rem < child_span {
                return child.do_convert_offset(rem, base);
            }
            rem -= child_span;
            base += child.count as u64 * child.aligned_instance();
        }
        unreachable!("offset beyond the region children")
    }

    /// Translate a logical span starting at offset 0 to the physical size
    /// the file needs to cover it, rounded to whole pages.
    pub fn convert_size(&self, raw_size: u64) -> u64 {
        if raw_size == 0 {
            return 0;
        }
        let last = self.convert_offset(raw_size - 1);
        let page = self.layout.page_index(last);
        self.layout.page_offset(page) + self.layout.total() as u64
    }

    /// The full physical size of the region tree.
    pub fn full_size(&self) -> u64 {
        self.count as u64 * self.aligned_instance()
    }
}
