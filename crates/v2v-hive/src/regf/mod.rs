//! Backing store over a `regf` hive file.

mod format;

use std::{
    fs::OpenOptions,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use zerocopy::{FromBytes, FromZeros as _, Immutable, IntoBytes, byteorder::little_endian::U32};

use self::format::{
    BASE_BLOCK_SIZE, BaseBlock, CELL_ALIGNMENT, CELL_SIZE_FIELD, DATA_INLINE, DB_SIGNATURE,
    DbHeader, EMPTY_SECURITY_DESCRIPTOR, HBIN_ALIGNMENT, HBIN_HEADER_SIZE, HBIN_SIGNATURE,
    HashEntry, HbinHeader, INVALID_OFFSET, LF_SIGNATURE, LH_SIGNATURE, LI_SIGNATURE, ListHeader,
    MAX_CELL_DATA, NK_SIGNATURE, NkFlags, NkHeader, REGF_SIGNATURE, RI_SIGNATURE, SK_SIGNATURE,
    SkHeader, VK_SIGNATURE, VkFlags, VkHeader, align_up, decode_name, encode_name, filetime_now,
    name_hash, name_length_utf16,
};
use crate::{HiveError, HiveStore, NodeId, RegistryValue, names_equal, store::upcase};

/// Longest key name, in UTF-16 code units.
const MAX_KEY_NAME: usize = 255;

/// Longest value name, in UTF-16 code units.
const MAX_VALUE_NAME: usize = 16383;

/// A hive file loaded into memory.
///
/// The whole file is read on [`open`]. Edits modify the in-memory copy
/// only: new cells are carved from the free space at the end of the last
/// hive bin, or from freshly appended bins, and replaced cells are marked
/// free. [`commit`] rewrites the file in one go. Dropping the store without
/// committing leaves the file untouched.
///
/// [`open`]: RegfHive::open
/// [`commit`]: HiveStore::commit
pub struct RegfHive {
    path: PathBuf,
    data: Vec<u8>,
    writable: bool,
    dirty: bool,

    /// Free cell ending the last hive bin, if any.
    tail_free: Option<u32>,
}

impl RegfHive {
    /// Opens a hive file.
    ///
    /// With `writable` unset, every mutation fails with
    /// [`HiveError::ReadOnly`] and [`commit`] fails with
    /// [`HiveError::CommitFailed`].
    ///
    /// [`commit`]: HiveStore::commit
    pub fn open(path: impl AsRef<Path>, writable: bool) -> Result<Self, HiveError> {
        let path = path.as_ref();
        let mut data = std::fs::read(path)?;

        let (base, _) =
            BaseBlock::read_from_prefix(&data).map_err(|_| HiveError::InvalidSignature)?;

        if base.signature != REGF_SIGNATURE {
            return Err(HiveError::InvalidSignature);
        }

        if base.major_version.get() != 1 {
            return Err(HiveError::Corrupted("unsupported major version"));
        }

        let bins_size = base.hive_bins_size.get() as usize;
        if bins_size < HBIN_ALIGNMENT || BASE_BLOCK_SIZE + bins_size > data.len() {
            return Err(HiveError::Corrupted("hive bins size out of range"));
        }

        // Anything past the last hive bin is slack space.
        data.truncate(BASE_BLOCK_SIZE + bins_size);

        if base.checksum.get() != base.compute_checksum() {
            tracing::warn!(path = %path.display(), "Hive base block checksum mismatch");
        }

        if base.primary_sequence != base.secondary_sequence {
            tracing::warn!(path = %path.display(), "Hive was not cleanly written");
        }

        let (hbin, _) = HbinHeader::read_from_prefix(&data[BASE_BLOCK_SIZE..])
            .map_err(|_| HiveError::InvalidSignature)?;

        if hbin.signature != HBIN_SIGNATURE {
            return Err(HiveError::InvalidSignature);
        }

        let mut hive = Self {
            path: path.to_owned(),
            data,
            writable,
            dirty: false,
            tail_free: None,
        };

        hive.nk(base.root_cell.get())?;
        hive.tail_free = hive.find_tail_free();

        tracing::debug!(
            path = %path.display(),
            size = hive.data.len(),
            writable,
            "Opened hive"
        );

        Ok(hive)
    }

    /// Creates a new hive file containing only a root key.
    ///
    /// An existing file at `path` is overwritten. The returned store is
    /// writable.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, HiveError> {
        const ROOT_NAME: &[u8] = b"ROOT";

        let path = path.as_ref();
        let now = filetime_now();

        let root = HBIN_HEADER_SIZE as u32;
        let root_size = align_up(
            CELL_SIZE_FIELD + size_of::<NkHeader>() + ROOT_NAME.len(),
            CELL_ALIGNMENT,
        );
        let security = root + root_size as u32;
        let security_size = align_up(
            CELL_SIZE_FIELD + size_of::<SkHeader>() + EMPTY_SECURITY_DESCRIPTOR.len(),
            CELL_ALIGNMENT,
        );
        let free = security + security_size as u32;

        //
        // Base block and the first hive bin.
        //

        let mut base = BaseBlock::new_zeroed();
        base.signature = REGF_SIGNATURE;
        base.primary_sequence.set(1);
        base.secondary_sequence.set(1);
        base.last_written.set(now);
        base.major_version.set(1);
        base.minor_version.set(5);
        base.file_format.set(1);
        base.root_cell.set(root);
        base.hive_bins_size.set(HBIN_ALIGNMENT as u32);
        base.clustering_factor.set(1);

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
            .encode_utf16()
            .take(base.file_name.len() / 2 - 1)
            .flat_map(u16::to_le_bytes)
            .collect::<Vec<_>>();
        base.file_name[..file_name.len()].copy_from_slice(&file_name);
        base.checksum.set(base.compute_checksum());

        let mut hbin = HbinHeader::new_zeroed();
        hbin.signature = HBIN_SIGNATURE;
        hbin.size.set(HBIN_ALIGNMENT as u32);
        hbin.timestamp.set(now);

        let mut hive = Self {
            path: path.to_owned(),
            data: vec![0; BASE_BLOCK_SIZE + HBIN_ALIGNMENT],
            writable: true,
            dirty: false,
            tail_free: Some(free),
        };

        hive.data[..BASE_BLOCK_SIZE].copy_from_slice(base.as_bytes());
        hive.data[BASE_BLOCK_SIZE..BASE_BLOCK_SIZE + HBIN_HEADER_SIZE]
            .copy_from_slice(hbin.as_bytes());

        hive.set_cell_size(root, -(root_size as i32))?;
        hive.set_cell_size(security, -(security_size as i32))?;
        hive.set_cell_size(free, (HBIN_ALIGNMENT as u32 - free) as i32)?;

        //
        // Root key and its security descriptor.
        //

        let mut nk = NkHeader::new_zeroed();
        nk.signature = NK_SIGNATURE;
        nk.flags
            .set((NkFlags::HIVE_ENTRY | NkFlags::NO_DELETE | NkFlags::COMP_NAME).bits());
        nk.last_written.set(now);
        nk.parent.set(INVALID_OFFSET);
        nk.subkeys_list.set(INVALID_OFFSET);
        nk.volatile_subkeys_list.set(INVALID_OFFSET);
        nk.values_list.set(INVALID_OFFSET);
        nk.security.set(security);
        nk.class_name.set(INVALID_OFFSET);
        nk.name_length.set(ROOT_NAME.len() as u16);

        hive.write(root, &nk)?;
        hive.write_bytes(root, size_of::<NkHeader>(), ROOT_NAME)?;

        let mut sk = SkHeader::new_zeroed();
        sk.signature = SK_SIGNATURE;
        sk.flink.set(security);
        sk.blink.set(security);
        sk.refcount.set(1);
        sk.descriptor_size.set(EMPTY_SECURITY_DESCRIPTOR.len() as u32);

        hive.write(security, &sk)?;
        hive.write_bytes(security, size_of::<SkHeader>(), &EMPTY_SECURITY_DESCRIPTOR)?;

        std::fs::write(path, &hive.data)?;
        hive.dirty = false;
        tracing::debug!(path = %path.display(), "Created hive");

        Ok(hive)
    }

    /// Returns the path of the hive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the hive was opened for writing.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Returns whether there are uncommitted edits.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn ensure_writable(&self) -> Result<(), HiveError> {
        match self.writable {
            true => Ok(()),
            false => Err(HiveError::ReadOnly),
        }
    }

    ///////////////////////////////////////////////////////////////////////////
    // Cells
    ///////////////////////////////////////////////////////////////////////////

    fn base(&self) -> Result<BaseBlock, HiveError> {
        BaseBlock::read_from_prefix(&self.data)
            .map(|(base, _)| base)
            .map_err(|_| HiveError::Corrupted("truncated base block"))
    }

    fn set_base(&mut self, base: &BaseBlock) {
        self.data[..BASE_BLOCK_SIZE].copy_from_slice(base.as_bytes());
    }

    fn cell_size(&self, offset: u32) -> Option<i32> {
        let start = BASE_BLOCK_SIZE.checked_add(offset as usize)?;
        let bytes = self.data.get(start..start.checked_add(CELL_SIZE_FIELD)?)?;
        Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn set_cell_size(&mut self, offset: u32, size: i32) -> Result<(), HiveError> {
        let start = BASE_BLOCK_SIZE + offset as usize;
        self.data
            .get_mut(start..start + CELL_SIZE_FIELD)
            .ok_or(HiveError::Corrupted("cell offset out of range"))?
            .copy_from_slice(&size.to_le_bytes());

        Ok(())
    }

    /// Returns the byte range of the data of an allocated cell.
    fn cell_range(&self, offset: u32) -> Result<(usize, usize), HiveError> {
        let size = self
            .cell_size(offset)
            .ok_or(HiveError::Corrupted("cell offset out of range"))?;

        if size >= 0 {
            return Err(HiveError::Corrupted("reference to a free cell"));
        }

        let start = BASE_BLOCK_SIZE + offset as usize;
        let len = size.unsigned_abs() as usize;
        let end = start + len;

        if len < CELL_SIZE_FIELD || end > self.data.len() {
            return Err(HiveError::Corrupted("cell size out of range"));
        }

        Ok((start + CELL_SIZE_FIELD, end))
    }

    fn cell(&self, offset: u32) -> Result<&[u8], HiveError> {
        let (start, end) = self.cell_range(offset)?;
        Ok(&self.data[start..end])
    }

    fn read<T>(&self, offset: u32) -> Result<T, HiveError>
    where
        T: FromBytes,
    {
        T::read_from_prefix(self.cell(offset)?)
            .map(|(value, _)| value)
            .map_err(|_| HiveError::Corrupted("cell too small"))
    }

    fn write<T>(&mut self, offset: u32, value: &T) -> Result<(), HiveError>
    where
        T: IntoBytes + Immutable,
    {
        self.write_bytes(offset, 0, value.as_bytes())
    }

    fn write_bytes(&mut self, offset: u32, at: usize, bytes: &[u8]) -> Result<(), HiveError> {
        let (start, end) = self.cell_range(offset)?;
        self.data[start..end]
            .get_mut(at..at + bytes.len())
            .ok_or(HiveError::Corrupted("cell too small"))?
            .copy_from_slice(bytes);

        self.dirty = true;
        Ok(())
    }

    /// Reads `count` cell offsets from the start of a cell.
    fn offsets(&self, offset: u32, count: usize) -> Result<Vec<u32>, HiveError> {
        read_offsets(self.cell(offset)?, count, size_of::<u32>())
    }

    /// Locates a free cell ending the last hive bin.
    fn find_tail_free(&self) -> Option<u32> {
        let end = self.data.len() - BASE_BLOCK_SIZE;

        let mut bin = 0;
        let mut last_bin = None;
        while bin < end {
            let (header, _) =
                HbinHeader::read_from_prefix(&self.data[BASE_BLOCK_SIZE + bin..]).ok()?;
            let size = header.size.get() as usize;

            if header.signature != HBIN_SIGNATURE || size == 0 {
                return None;
            }

            last_bin = Some(bin);
            bin += size;
        }

        let mut cell = last_bin? + HBIN_HEADER_SIZE;
        let bin_end = bin.min(end);
        while cell + CELL_SIZE_FIELD <= bin_end {
            let size = self.cell_size(cell as u32)?;
            let len = size.unsigned_abs() as usize;

            if len < CELL_SIZE_FIELD {
                return None;
            }

            if size > 0 && cell + len == bin_end {
                return Some(cell as u32);
            }

            cell += len;
        }

        None
    }

    /// Allocates a zeroed cell holding at least `len` bytes.
    fn allocate(&mut self, len: usize) -> Result<u32, HiveError> {
        let size = align_up(len + CELL_SIZE_FIELD, CELL_ALIGNMENT);

        let offset = match self.take_tail_free(size)? {
            Some(offset) => offset,
            None => self.append_bin(size)?,
        };

        let (start, end) = self.cell_range(offset)?;
        self.data[start..end].fill(0);
        self.dirty = true;

        Ok(offset)
    }

    fn take_tail_free(&mut self, size: usize) -> Result<Option<u32>, HiveError> {
        let Some(free) = self.tail_free
        else {
            return Ok(None);
        };

        let available = match self.cell_size(free) {
            Some(available) if available > 0 => available as usize,
            _ => {
                self.tail_free = None;
                return Ok(None);
            }
        };

        if available < size {
            return Ok(None);
        }

        if available - size >= CELL_ALIGNMENT {
            let rest = free + size as u32;
            self.set_cell_size(free, -(size as i32))?;
            self.set_cell_size(rest, (available - size) as i32)?;
            self.tail_free = Some(rest);
        }
        else {
            self.set_cell_size(free, -(available as i32))?;
            self.tail_free = None;
        }

        Ok(Some(free))
    }

    fn append_bin(&mut self, size: usize) -> Result<u32, HiveError> {
        let mut base = self.base()?;
        let bin_offset = base.hive_bins_size.get();
        let bin_size = align_up(size + HBIN_HEADER_SIZE, HBIN_ALIGNMENT);

        let mut header = HbinHeader::new_zeroed();
        header.signature = HBIN_SIGNATURE;
        header.offset.set(bin_offset);
        header.size.set(bin_size as u32);

        let mut bin = vec![0; bin_size];
        bin[..HBIN_HEADER_SIZE].copy_from_slice(header.as_bytes());
        bin[HBIN_HEADER_SIZE..HBIN_HEADER_SIZE + CELL_SIZE_FIELD]
            .copy_from_slice(&(-(size as i32)).to_le_bytes());

        let rest = bin_size - HBIN_HEADER_SIZE - size;
        let rest_offset = HBIN_HEADER_SIZE + size;
        if rest > 0 {
            bin[rest_offset..rest_offset + CELL_SIZE_FIELD]
                .copy_from_slice(&(rest as i32).to_le_bytes());
            self.tail_free = Some(bin_offset + rest_offset as u32);
        }
        else {
            self.tail_free = None;
        }

        self.data.extend_from_slice(&bin);
        base.hive_bins_size.set(bin_offset + bin_size as u32);
        self.set_base(&base);

        tracing::trace!(offset = bin_offset, size = bin_size, "Appended hive bin");

        Ok(bin_offset + HBIN_HEADER_SIZE as u32)
    }

    fn free(&mut self, offset: u32) -> Result<(), HiveError> {
        match self.cell_size(offset) {
            Some(size) if size < 0 => self.set_cell_size(offset, -size),
            _ => Err(HiveError::Corrupted("freeing a free cell")),
        }
    }

    ///////////////////////////////////////////////////////////////////////////
    // Records
    ///////////////////////////////////////////////////////////////////////////

    fn nk(&self, offset: u32) -> Result<NkHeader, HiveError> {
        let nk = self.read::<NkHeader>(offset)?;
        match nk.signature {
            NK_SIGNATURE => Ok(nk),
            _ => Err(HiveError::Corrupted("expected a key node")),
        }
    }

    fn vk(&self, offset: u32) -> Result<VkHeader, HiveError> {
        let vk = self.read::<VkHeader>(offset)?;
        match vk.signature {
            VK_SIGNATURE => Ok(vk),
            _ => Err(HiveError::Corrupted("expected a value key")),
        }
    }

    fn sk(&self, offset: u32) -> Result<SkHeader, HiveError> {
        let sk = self.read::<SkHeader>(offset)?;
        match sk.signature {
            SK_SIGNATURE => Ok(sk),
            _ => Err(HiveError::Corrupted("expected a security key")),
        }
    }

    /// Reads a name stored right after a record header.
    fn record_name(
        &self,
        offset: u32,
        header_size: usize,
        length: u16,
        compressed: bool,
    ) -> Result<String, HiveError> {
        let bytes = self
            .cell(offset)?
            .get(header_size..header_size + length as usize)
            .ok_or(HiveError::Corrupted("name out of range"))?;

        Ok(decode_name(bytes, compressed))
    }

    /// Collects the subkeys of a key together with the cells of its
    /// subkey list.
    fn subkeys(&self, nk: &NkHeader) -> Result<(Vec<NodeId>, Vec<u32>), HiveError> {
        let mut children = Vec::new();
        let mut cells = Vec::new();

        if nk.subkey_count.get() > 0 && nk.subkeys_list.get() != INVALID_OFFSET {
            self.walk_subkey_list(nk.subkeys_list.get(), &mut children, &mut cells, false)?;
        }

        Ok((children, cells))
    }

    fn walk_subkey_list(
        &self,
        list: u32,
        children: &mut Vec<NodeId>,
        cells: &mut Vec<u32>,
        nested: bool,
    ) -> Result<(), HiveError> {
        let cell = self.cell(list)?;
        let (header, entries) = ListHeader::read_from_prefix(cell)
            .map_err(|_| HiveError::Corrupted("subkey list too small"))?;
        let count = header.count.get() as usize;

        cells.push(list);

        match header.signature {
            LF_SIGNATURE | LH_SIGNATURE => {
                let offsets = read_offsets(entries, count, size_of::<HashEntry>())?;
                children.extend(offsets.into_iter().map(NodeId));
            }
            LI_SIGNATURE => {
                let offsets = read_offsets(entries, count, size_of::<u32>())?;
                children.extend(offsets.into_iter().map(NodeId));
            }
            RI_SIGNATURE if !nested => {
                for sublist in read_offsets(entries, count, size_of::<u32>())? {
                    self.walk_subkey_list(sublist, children, cells, true)?;
                }
            }
            _ => return Err(HiveError::Corrupted("unknown subkey list")),
        }

        Ok(())
    }

    fn value_offsets(&self, nk: &NkHeader) -> Result<Vec<u32>, HiveError> {
        match (nk.value_count.get(), nk.values_list.get()) {
            (0, _) | (_, INVALID_OFFSET) => Ok(Vec::new()),
            (count, list) => self.offsets(list, count as usize),
        }
    }

    fn value_name(&self, offset: u32) -> Result<String, HiveError> {
        let vk = self.vk(offset)?;
        self.record_name(
            offset,
            size_of::<VkHeader>(),
            vk.name_length.get(),
            vk.flags().contains(VkFlags::COMP_NAME),
        )
    }

    fn read_value(&self, offset: u32) -> Result<RegistryValue, HiveError> {
        let vk = self.vk(offset)?;

        Ok(RegistryValue {
            name: self.value_name(offset)?,
            value_type: vk.data_type.get(),
            data: self.value_data(&vk)?,
        })
    }

    fn value_data(&self, vk: &VkHeader) -> Result<Vec<u8>, HiveError> {
        let len = vk.data_len();

        if vk.is_inline() {
            let inline = vk.data_offset.get().to_le_bytes();
            return Ok(inline[..len.min(inline.len())].to_vec());
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let cell = self.cell(vk.data_offset.get())?;
        if len > MAX_CELL_DATA && cell.starts_with(&DB_SIGNATURE) {
            return self.big_data(vk.data_offset.get(), len);
        }

        cell.get(..len)
            .map(<[u8]>::to_vec)
            .ok_or(HiveError::Corrupted("value data out of range"))
    }

    fn big_data(&self, offset: u32, len: usize) -> Result<Vec<u8>, HiveError> {
        let db = self.read::<DbHeader>(offset)?;
        let segments = self.offsets(db.segment_list.get(), db.segment_count.get() as usize)?;

        let mut data = Vec::with_capacity(len);
        for segment in segments {
            let cell = self.cell(segment)?;
            let take = (len - data.len()).min(cell.len()).min(MAX_CELL_DATA);
            data.extend_from_slice(&cell[..take]);
        }

        match data.len() == len {
            true => Ok(data),
            false => Err(HiveError::Corrupted("big data truncated")),
        }
    }

    /// Returns the cells owned by a value key, the key itself included.
    fn value_cells(&self, offset: u32) -> Result<Vec<u32>, HiveError> {
        let vk = self.vk(offset)?;
        let mut cells = vec![offset];

        if vk.is_inline() || vk.data_len() == 0 {
            return Ok(cells);
        }

        let data = vk.data_offset.get();
        if vk.data_len() > MAX_CELL_DATA && self.cell(data)?.starts_with(&DB_SIGNATURE) {
            let db = self.read::<DbHeader>(data)?;
            cells.extend(self.offsets(db.segment_list.get(), db.segment_count.get() as usize)?);
            cells.push(db.segment_list.get());
        }

        cells.push(data);
        Ok(cells)
    }
}

/// Reads the leading cell offset of each of `count` entries of `stride`
/// bytes.
fn read_offsets(bytes: &[u8], count: usize, stride: usize) -> Result<Vec<u32>, HiveError> {
    Ok(bytes
        .get(..count * stride)
        .ok_or(HiveError::Corrupted("offset list out of range"))?
        .chunks_exact(stride)
        .map(|entry| u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]))
        .collect())
}

impl HiveStore for RegfHive {
    fn root(&self) -> Result<NodeId, HiveError> {
        Ok(NodeId(self.base()?.root_cell.get()))
    }

    fn node_name(&self, node: NodeId) -> Result<String, HiveError> {
        let nk = self.nk(node.0)?;
        self.record_name(
            node.0,
            size_of::<NkHeader>(),
            nk.name_length.get(),
            nk.flags().contains(NkFlags::COMP_NAME),
        )
    }

    fn node_children(&self, node: NodeId) -> Result<Vec<NodeId>, HiveError> {
        let (children, _) = self.subkeys(&self.nk(node.0)?)?;
        Ok(children)
    }

    fn node_add_child(&mut self, node: NodeId, name: &str) -> Result<NodeId, HiveError> {
        self.ensure_writable()?;

        if name.is_empty() || name.contains('\\') || name.encode_utf16().count() > MAX_KEY_NAME {
            return Err(HiveError::InvalidKeyName(name.to_owned()));
        }

        if self.node_child(node, name)?.is_some() {
            return Err(HiveError::KeyExists(name.to_owned()));
        }

        let mut parent = self.nk(node.0)?;
        let (children, old_cells) = self.subkeys(&parent)?;
        let now = filetime_now();

        //
        // Create the key node. It shares the security key of its parent.
        //

        let (name_bytes, compressed) = encode_name(name);

        let mut flags = NkFlags::empty();
        flags.set(NkFlags::COMP_NAME, compressed);

        let mut nk = NkHeader::new_zeroed();
        nk.signature = NK_SIGNATURE;
        nk.flags.set(flags.bits());
        nk.last_written.set(now);
        nk.parent.set(node.0);
        nk.subkeys_list.set(INVALID_OFFSET);
        nk.volatile_subkeys_list.set(INVALID_OFFSET);
        nk.values_list.set(INVALID_OFFSET);
        nk.security.set(parent.security.get());
        nk.class_name.set(INVALID_OFFSET);
        nk.name_length.set(name_bytes.len() as u16);

        let child = self.allocate(size_of::<NkHeader>() + name_bytes.len())?;
        self.write(child, &nk)?;
        self.write_bytes(child, size_of::<NkHeader>(), &name_bytes)?;

        let security = parent.security.get();
        if security != INVALID_OFFSET {
            let mut sk = self.sk(security)?;
            sk.refcount.set(sk.refcount.get().saturating_add(1));
            self.write(security, &sk)?;
        }

        //
        // Replace the subkey list of the parent with a sorted hash leaf.
        //

        let mut entries = children
            .into_iter()
            .map(|child| Ok((self.node_name(child)?, child.0)))
            .collect::<Result<Vec<_>, HiveError>>()?;
        entries.push((name.to_owned(), child));
        entries.sort_by_cached_key(|(name, _)| name.chars().map(upcase).collect::<String>());

        let count = u16::try_from(entries.len())
            .map_err(|_| HiveError::Corrupted("too many subkeys"))?;

        let mut list = ListHeader::new_zeroed();
        list.signature = LH_SIGNATURE;
        list.count.set(count);

        let mut bytes = list.as_bytes().to_vec();
        for (name, offset) in &entries {
            let entry = HashEntry {
                offset: U32::new(*offset),
                hash: U32::new(name_hash(name)),
            };
            bytes.extend_from_slice(entry.as_bytes());
        }

        let list = self.allocate(bytes.len())?;
        self.write_bytes(list, 0, &bytes)?;

        for cell in old_cells {
            self.free(cell)?;
        }

        // Only the low word holds the length; the high word carries flags.
        let max_name = parent.max_subkey_name.get();
        let name_len = name_length_utf16(name);
        if name_len > max_name & 0xFFFF {
            parent.max_subkey_name.set((max_name & !0xFFFF) | name_len);
        }

        parent.subkey_count.set(u32::from(count));
        parent.subkeys_list.set(list);
        parent.last_written.set(now);
        self.write(node.0, &parent)?;

        tracing::trace!(name, offset = child, parent = node.0, "Created key node");

        Ok(NodeId(child))
    }

    fn node_values(&self, node: NodeId) -> Result<Vec<RegistryValue>, HiveError> {
        self.value_offsets(&self.nk(node.0)?)?
            .into_iter()
            .map(|offset| self.read_value(offset))
            .collect()
    }

    fn node_set_value(&mut self, node: NodeId, value: &RegistryValue) -> Result<(), HiveError> {
        self.ensure_writable()?;

        if value.data.len() > MAX_CELL_DATA {
            return Err(HiveError::ValueTooLarge(value.data.len()));
        }

        if value.name.encode_utf16().count() > MAX_VALUE_NAME {
            return Err(HiveError::InvalidKeyName(value.name.clone()));
        }

        let mut nk = self.nk(node.0)?;
        let offsets = self.value_offsets(&nk)?;

        let mut existing = None;
        for (index, &offset) in offsets.iter().enumerate() {
            if names_equal(&self.value_name(offset)?, &value.name) {
                existing = Some(index);
                break;
            }
        }

        //
        // Create the value key. Data of up to 4 bytes is stored inline.
        //

        let (name_bytes, compressed) = encode_name(&value.name);

        let mut flags = VkFlags::empty();
        flags.set(VkFlags::COMP_NAME, compressed);

        let mut vk = VkHeader::new_zeroed();
        vk.signature = VK_SIGNATURE;
        vk.name_length.set(name_bytes.len() as u16);
        vk.data_type.set(value.value_type);
        vk.flags.set(flags.bits());

        let len = value.data.len();
        if len <= 4 {
            let mut inline = [0; 4];
            inline[..len].copy_from_slice(&value.data);
            vk.data_size.set(len as u32 | DATA_INLINE);
            vk.data_offset.set(u32::from_le_bytes(inline));
        }
        else {
            let data = self.allocate(len)?;
            self.write_bytes(data, 0, &value.data)?;
            vk.data_size.set(len as u32);
            vk.data_offset.set(data);
        }

        let offset = self.allocate(size_of::<VkHeader>() + name_bytes.len())?;
        self.write(offset, &vk)?;
        self.write_bytes(offset, size_of::<VkHeader>(), &name_bytes)?;

        match existing {
            Some(index) => {
                let old = offsets[index];
                self.write_bytes(nk.values_list.get(), index * 4, &offset.to_le_bytes())?;

                for cell in self.value_cells(old)? {
                    self.free(cell)?;
                }
            }
            None => {
                let bytes = offsets
                    .iter()
                    .chain([&offset])
                    .flat_map(|offset| offset.to_le_bytes())
                    .collect::<Vec<_>>();

                let list = self.allocate(bytes.len())?;
                self.write_bytes(list, 0, &bytes)?;

                if !offsets.is_empty() {
                    self.free(nk.values_list.get())?;
                }

                nk.value_count.set(offsets.len() as u32 + 1);
                nk.values_list.set(list);
            }
        }

        let name_len = name_length_utf16(&value.name);
        if name_len > nk.max_value_name.get() {
            nk.max_value_name.set(name_len);
        }

        if len as u32 > nk.max_value_data.get() {
            nk.max_value_data.set(len as u32);
        }

        nk.last_written.set(filetime_now());
        self.write(node.0, &nk)?;

        tracing::trace!(name = %value.name, offset, node = node.0, "Set value");

        Ok(())
    }

    fn commit(&mut self) -> Result<(), HiveError> {
        if !self.writable {
            return Err(HiveError::CommitFailed {
                path: self.path.clone(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "hive opened read-only"),
            });
        }

        let mut base = self.base()?;
        let sequence = base.primary_sequence.get().wrapping_add(1);
        base.primary_sequence.set(sequence);
        base.secondary_sequence.set(sequence);
        base.last_written.set(filetime_now());
        base.checksum.set(base.compute_checksum());
        self.set_base(&base);

        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .and_then(|mut file| {
                file.write_all(&self.data)?;
                file.sync_all()
            })
            .map_err(|source| HiveError::CommitFailed {
                path: self.path.clone(),
                source,
            })?;

        self.dirty = false;
        tracing::debug!(path = %self.path.display(), sequence, "Committed hive");

        Ok(())
    }
}

impl Drop for RegfHive {
    fn drop(&mut self) {
        if self.dirty {
            tracing::debug!(path = %self.path.display(), "Discarding uncommitted hive edits");
        }
    }
}
