//! Pixel storage with reference-counted locking and generation IDs.
//!
//! A [`PixelRef`] owns (or knows how to produce) the bytes of one image. The
//! bytes are reached through [`PixelRef::lock_pixels`], which returns a
//! [`LockedPixels`] guard; the first lock asks the [`PixelProvider`] for the
//! pixels and the last unlock lets it release them. Pre-locked refs keep
//! their pixels for their whole lifetime and skip the counting.
//!
//! The lock state of every ref is guarded by a mutex taken from a small
//! global ring, so unrelated refs rarely contend and no ref pays for a mutex
//! of its own.
//!
//! Generation IDs identify pixel contents for caching. They are assigned
//! lazily, are never 0 and are always even; the low bit of the stored value
//! marks the ID as unique to this ref. Changing the pixels fires the
//! registered [`GenIdChangeListener`]s (while the old ID is still readable)
//! and then forgets the ID so the next read assigns a fresh one.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{trace, warn};

use crate::color::{ColorTable, ColorType};
use crate::discardable::DiscardableMemory;
use crate::error::{Error, Result};
use crate::pixmap::{ImageInfo, Pixmap};
use crate::yuv_planes_cache::YuvPlanes;

// ============================================================================
// Mutex ring
// ============================================================================

const MUTEX_RING_COUNT: usize = 32;

#[allow(clippy::declare_interior_mutable_const)]
const RING_MUTEX_INIT: Mutex<()> = Mutex::new(());
static MUTEX_RING: [Mutex<()>; MUTEX_RING_COUNT] = [RING_MUTEX_INIT; MUTEX_RING_COUNT];
static MUTEX_RING_INDEX: AtomicUsize = AtomicUsize::new(0);

fn next_ring_mutex() -> &'static Mutex<()> {
    let index = MUTEX_RING_INDEX.fetch_add(1, Ordering::Relaxed);
    &MUTEX_RING[index & (MUTEX_RING_COUNT - 1)]
}

// ============================================================================
// Generation IDs
// ============================================================================

static NEXT_GEN_ID: AtomicU32 = AtomicU32::new(0);

fn next_gen_id() -> u32 {
    loop {
        // Steps of 2 keep the low bit free for the uniqueness tag.
        let id = NEXT_GEN_ID.fetch_add(2, Ordering::Relaxed).wrapping_add(2);
        if id != 0 {
            return id;
        }
    }
}

/// Called once when the generation ID of a [`PixelRef`] goes stale.
pub trait GenIdChangeListener: Send {
    fn on_change(self: Box<Self>);
}

impl<F: FnOnce() + Send> GenIdChangeListener for F {
    fn on_change(self: Box<Self>) {
        (*self)()
    }
}

// ============================================================================
// Providers
// ============================================================================

/// Locked pixel memory: the bytes, their stride and the palette for
/// [`ColorType::Index8`].
#[derive(Debug, Clone)]
pub struct LockRec {
    pub pixels: Arc<Vec<u8>>,
    pub row_bytes: usize,
    pub color_table: Option<Arc<ColorTable>>,
}

impl LockRec {
    pub fn new(pixels: Vec<u8>, row_bytes: usize) -> Self {
        Self {
            pixels: Arc::new(pixels),
            row_bytes,
            color_table: None,
        }
    }

    pub fn with_color_table(mut self, table: Option<Arc<ColorTable>>) -> Self {
        self.color_table = table;
        self
    }
}

/// Produces and releases the pixels behind a [`PixelRef`].
///
/// `on_lock_pixels` runs on the 0→1 lock transition and `on_unlock_pixels`
/// on 1→0, both with the ref's ring mutex held. A provider must not lock
/// other pixel refs from these callbacks.
pub trait PixelProvider: Send + Sync {
    /// Pixels that stay locked for the lifetime of the ref. Called once,
    /// when the ref is created.
    fn take_pre_locked(&mut self) -> Option<LockRec> {
        None
    }

    fn on_lock_pixels(&self, info: &ImageInfo) -> Option<LockRec>;

    fn on_unlock_pixels(&self) {}

    /// Y, U and V planes of the image, for sources that can provide them
    /// without decoding to RGB.
    fn on_get_yuv8_planes(&self) -> Option<YuvPlanes> {
        None
    }

    fn allocated_size(&self) -> usize {
        0
    }
}

/// Heap pixels owned by the ref, locked from creation on.
#[derive(Debug)]
pub struct MallocPixels {
    rec: Option<LockRec>,
    size: usize,
}

impl MallocPixels {
    /// Wrap `pixels`, checking the stride and length against `info`.
    /// [`ColorType::Index8`] images need a color table.
    pub fn new(
        info: &ImageInfo,
        pixels: Vec<u8>,
        row_bytes: usize,
        color_table: Option<Arc<ColorTable>>,
    ) -> Result<Self> {
        if row_bytes < info.min_row_bytes() {
            return Err(Error::RowBytesTooSmall {
                row_bytes,
                min_row_bytes: info.min_row_bytes(),
            });
        }
        let required = info
            .compute_byte_size(row_bytes)
            .ok_or(Error::AllocationFailed(usize::MAX))?;
        if pixels.len() < required {
            return Err(Error::BufferTooSmall {
                len: pixels.len(),
                required,
            });
        }
        if info.color_type() == ColorType::Index8 && color_table.is_none() && !info.is_empty() {
            return Err(Error::UnsupportedColorType(ColorType::Index8));
        }
        let size = pixels.len();
        Ok(Self {
            rec: Some(LockRec::new(pixels, row_bytes).with_color_table(color_table)),
            size,
        })
    }
}

impl PixelProvider for MallocPixels {
    fn take_pre_locked(&mut self) -> Option<LockRec> {
        self.rec.take()
    }

    fn on_lock_pixels(&self, _info: &ImageInfo) -> Option<LockRec> {
        None
    }

    fn allocated_size(&self) -> usize {
        self.size
    }
}

/// Pixels produced on demand, for example by decoding, and dropped when the
/// last lock goes away.
pub struct LazyPixels<F> {
    decode: F,
}

impl<F> LazyPixels<F>
where
    F: Fn(&ImageInfo) -> Option<LockRec> + Send + Sync,
{
    pub fn new(decode: F) -> Self {
        Self { decode }
    }
}

impl<F> PixelProvider for LazyPixels<F>
where
    F: Fn(&ImageInfo) -> Option<LockRec> + Send + Sync,
{
    fn on_lock_pixels(&self, info: &ImageInfo) -> Option<LockRec> {
        (self.decode)(info)
    }
}

/// Pixels held in [`DiscardableMemory`]. Locking fails once the memory has
/// been reclaimed.
pub struct DiscardablePixels {
    memory: Arc<dyn DiscardableMemory>,
    row_bytes: usize,
}

impl DiscardablePixels {
    pub fn new(memory: Arc<dyn DiscardableMemory>, row_bytes: usize) -> Self {
        Self { memory, row_bytes }
    }
}

impl PixelProvider for DiscardablePixels {
    fn on_lock_pixels(&self, _info: &ImageInfo) -> Option<LockRec> {
        self.memory.lock().map(|pixels| LockRec {
            pixels,
            row_bytes: self.row_bytes,
            color_table: None,
        })
    }

    fn allocated_size(&self) -> usize {
        self.memory.size()
    }
}

// ============================================================================
// PixelRef
// ============================================================================

struct LockState {
    rec: Option<LockRec>,
    lock_count: u32,
}

/// Shared pixel storage. See the module documentation.
pub struct PixelRef {
    info: ImageInfo,
    mutex: &'static Mutex<()>,
    state: UnsafeCell<LockState>,
    pre_locked: bool,
    provider: Box<dyn PixelProvider>,
    tagged_gen_id: AtomicU32,
    listeners: Mutex<Vec<Box<dyn GenIdChangeListener>>>,
    immutable: AtomicBool,
}

// SAFETY: `state` is only accessed while `mutex` is held; everything else is
// either immutable after construction or synchronised on its own.
unsafe impl Sync for PixelRef {}

impl PixelRef {
    pub fn new(info: ImageInfo, mut provider: Box<dyn PixelProvider>) -> Arc<Self> {
        let pre = provider.take_pre_locked();
        let pre_locked = pre.is_some();
        Arc::new(Self {
            info,
            mutex: next_ring_mutex(),
            state: UnsafeCell::new(LockState {
                rec: pre,
                lock_count: 0,
            }),
            pre_locked,
            provider,
            tagged_gen_id: AtomicU32::new(0),
            listeners: Mutex::new(Vec::new()),
            immutable: AtomicBool::new(false),
        })
    }

    /// A pre-locked ref over heap pixels.
    pub fn new_malloc(info: ImageInfo, pixels: Vec<u8>, row_bytes: usize) -> Result<Arc<Self>> {
        let provider = MallocPixels::new(&info, pixels, row_bytes, None)?;
        Ok(Self::new(info, Box::new(provider)))
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn is_pre_locked(&self) -> bool {
        self.pre_locked
    }

    pub fn allocated_size(&self) -> usize {
        self.provider.allocated_size()
    }

    fn guard(&self) -> MutexGuard<'static, ()> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------------

    /// Lock the pixels. `None` if the provider could not produce them.
    pub fn lock_pixels(self: &Arc<Self>) -> Option<LockedPixels> {
        let _guard = self.guard();
        // SAFETY: the ring mutex is held.
        let state = unsafe { &mut *self.state.get() };

        if self.pre_locked {
            let rec = state.rec.clone()?;
            return Some(LockedPixels::new(Arc::clone(self), rec, false));
        }

        state.lock_count += 1;
        if state.lock_count == 1 {
            match self.provider.on_lock_pixels(&self.info) {
                Some(rec) => state.rec = Some(rec),
                None => {
                    state.lock_count -= 1;
                    warn!(
                        "pixel ref {}x{}: provider failed to lock pixels",
                        self.info.width(),
                        self.info.height()
                    );
                    return None;
                }
            }
            trace!("pixel ref {:p}: locked", Arc::as_ptr(self));
        }
        match state.rec.clone() {
            Some(rec) => Some(LockedPixels::new(Arc::clone(self), rec, true)),
            None => {
                state.lock_count -= 1;
                None
            }
        }
    }

    fn unlock_pixels(&self) {
        let _guard = self.guard();
        // SAFETY: the ring mutex is held.
        let state = unsafe { &mut *self.state.get() };
        debug_assert!(state.lock_count > 0);
        state.lock_count = state.lock_count.saturating_sub(1);
        if state.lock_count == 0 && state.rec.take().is_some() {
            self.provider.on_unlock_pixels();
            trace!("pixel ref {:p}: unlocked", self as *const Self);
        }
    }

    /// Number of outstanding counted locks. Always 0 for pre-locked refs.
    pub fn lock_count(&self) -> u32 {
        let _guard = self.guard();
        // SAFETY: the ring mutex is held.
        unsafe { (*self.state.get()).lock_count }
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    pub fn is_immutable(&self) -> bool {
        self.immutable.load(Ordering::Acquire)
    }

    /// Promise that the pixels will never change again. Cannot be undone.
    pub fn set_immutable(&self) {
        self.immutable.store(true, Ordering::Release);
    }

    /// Modify the pixels in place and notify listeners.
    ///
    /// The callback receives the bytes and the row stride. Outstanding
    /// [`LockedPixels`] guards keep seeing the old contents. Only resident
    /// pixels (pre-locked, or currently locked) can be written.
    pub fn write_pixels<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut [u8], usize),
    {
        if self.is_immutable() {
            return Err(Error::ImmutablePixels);
        }
        {
            let _guard = self.guard();
            // SAFETY: the ring mutex is held.
            let state = unsafe { &mut *self.state.get() };
            let rec = state.rec.as_mut().ok_or(Error::LockFailed)?;
            let row_bytes = rec.row_bytes;
            f(Arc::make_mut(&mut rec.pixels).as_mut_slice(), row_bytes);
        }
        self.notify_pixels_changed();
        Ok(())
    }

    /// Tell the ref its pixels changed: fire the listeners and retire the
    /// generation ID.
    pub fn notify_pixels_changed(&self) {
        if self.is_immutable() {
            warn!(
                "notify_pixels_changed called on immutable pixel ref {}",
                self.generation_id()
            );
        }
        self.call_gen_id_change_listeners();
        self.tagged_gen_id.store(0, Ordering::Release);
    }

    // ------------------------------------------------------------------------
    // Generation IDs
    // ------------------------------------------------------------------------

    /// The ID of the current pixel contents. Never 0.
    pub fn generation_id(&self) -> u32 {
        let mut id = self.tagged_gen_id.load(Ordering::Acquire);
        if id == 0 {
            let next = next_gen_id() | 1;
            id = match self.tagged_gen_id.compare_exchange(
                0,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => next,
                Err(winner) => winner,
            };
        }
        id & !1
    }

    fn gen_id_is_unique(&self) -> bool {
        self.tagged_gen_id.load(Ordering::Acquire) & 1 != 0
    }

    /// Make this ref share `that`'s generation ID. Neither ID is unique
    /// afterwards, so neither ref fires change listeners any more.
    pub fn clone_gen_id(&self, that: &PixelRef) {
        let id = that.generation_id();
        self.tagged_gen_id.store(id & !1, Ordering::Release);
        that.tagged_gen_id.store(id & !1, Ordering::Release);
    }

    /// Register a single-shot listener for the next ID change (or drop).
    /// Ignored when the ID is not unique to this ref.
    pub fn add_gen_id_change_listener(&self, listener: Box<dyn GenIdChangeListener>) {
        if !self.gen_id_is_unique() {
            return;
        }
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn call_gen_id_change_listeners(&self) {
        let listeners =
            std::mem::take(&mut *self.listeners.lock().unwrap_or_else(PoisonError::into_inner));
        if self.gen_id_is_unique() {
            for listener in listeners {
                listener.on_change();
            }
        }
    }

    // ------------------------------------------------------------------------
    // YUV
    // ------------------------------------------------------------------------

    pub fn get_yuv8_planes(&self) -> Option<YuvPlanes> {
        self.provider.on_get_yuv8_planes()
    }
}

impl Drop for PixelRef {
    fn drop(&mut self) {
        self.call_gen_id_change_listeners();
    }
}

impl fmt::Debug for PixelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelRef")
            .field("info", &self.info)
            .field("pre_locked", &self.pre_locked)
            .field("gen_id", &self.tagged_gen_id.load(Ordering::Relaxed))
            .field("immutable", &self.is_immutable())
            .finish()
    }
}

// ============================================================================
// LockedPixels
// ============================================================================

/// A lock on a [`PixelRef`]'s pixels, released on drop.
pub struct LockedPixels {
    owner: Arc<PixelRef>,
    rec: LockRec,
    counted: bool,
    info: ImageInfo,
    offset: usize,
}

impl LockedPixels {
    fn new(owner: Arc<PixelRef>, rec: LockRec, counted: bool) -> Self {
        Self {
            info: owner.info,
            owner,
            rec,
            counted,
            offset: 0,
        }
    }

    /// Restrict the view to the `info`-sized area at `(x, y)`.
    pub(crate) fn into_subset(mut self, x: u32, y: u32, info: ImageInfo) -> Self {
        self.offset = y as usize * self.rec.row_bytes + x as usize * info.bytes_per_pixel();
        self.info = info;
        self
    }

    pub fn pixel_ref(&self) -> &Arc<PixelRef> {
        &self.owner
    }

    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    pub fn row_bytes(&self) -> usize {
        self.rec.row_bytes
    }

    pub fn color_table(&self) -> Option<&ColorTable> {
        self.rec.color_table.as_deref()
    }

    /// The locked bytes, starting at the first pixel of the view.
    pub fn pixels(&self) -> &[u8] {
        self.rec.pixels.get(self.offset..).unwrap_or(&[])
    }

    /// The locked pixels as a [`Pixmap`].
    pub fn pixmap(&self) -> Result<Pixmap<'_>> {
        Ok(Pixmap::new(self.info, self.pixels(), self.rec.row_bytes)?
            .with_color_table(self.color_table()))
    }
}

impl Drop for LockedPixels {
    fn drop(&mut self) {
        if self.counted {
            self.owner.unlock_pixels();
        }
    }
}

impl fmt::Debug for LockedPixels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedPixels")
            .field("info", &self.info)
            .field("row_bytes", &self.rec.row_bytes)
            .field("offset", &self.offset)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
