use core::ops::{Deref, DerefMut};

#[cfg(any(
    feature = "boxed-memblock",
    target_arch = "wasm32",
    target_arch = "xtensa"
))]
type MemBlockStorage<T, const N: usize> = Box<[T; N]>;

#[cfg(not(any(
    feature = "boxed-memblock",
    target_arch = "wasm32",
    target_arch = "xtensa"
)))]
type MemBlockStorage<T, const N: usize> = [T; N];

/// Fixed-size memory region backing the chip-owned storage blocks.
///
/// Inline array storage by default; heap-backed on small-stack targets or
/// with the `boxed-memblock` feature.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemBlock<T, const N: usize>(MemBlockStorage<T, N>);

#[cfg(feature = "savestate-serde")]
impl<T, const N: usize> serde::Serialize for MemBlock<T, N>
where
    T: Copy + Default + serde::Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let slice = self.as_slice();
        let mut seq = serializer.serialize_seq(Some(slice.len()))?;
        for item in slice {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

#[cfg(feature = "savestate-serde")]
impl<'de, T, const N: usize> serde::Deserialize<'de> for MemBlock<T, N>
where
    T: Copy + Default + serde::Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor<T, const N: usize>(core::marker::PhantomData<T>);

        impl<'de, T, const N: usize> serde::de::Visitor<'de> for Visitor<T, N>
        where
            T: Copy + Default + serde::Deserialize<'de>,
        {
            type Value = MemBlock<T, N>;

            fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "a sequence of length {N}")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut out = MemBlock::<T, N>::new();
                for idx in 0..N {
                    let Some(value) = seq.next_element::<T>()? else {
                        return Err(serde::de::Error::invalid_length(idx, &self));
                    };
                    out.as_mut_slice()[idx] = value;
                }
                Ok(out)
            }
        }

        deserializer.deserialize_seq(Visitor::<T, N>(core::marker::PhantomData))
    }
}

/// Palette RAM owned by the chip (32 bytes, folded and mirrored on access).
pub type PaletteRam = MemBlock<u8, { crate::memory::PALETTE_RAM_SIZE }>;
/// Primary sprite memory (64 sprites x 4 bytes).
pub type OamRam = MemBlock<u8, { crate::memory::OAM_RAM_SIZE }>;

impl<T, const N: usize> MemBlock<T, N> {
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        #[cfg(any(
            feature = "boxed-memblock",
            target_arch = "wasm32",
            target_arch = "xtensa"
        ))]
        {
            &*self.0
        }
        #[cfg(not(any(
            feature = "boxed-memblock",
            target_arch = "wasm32",
            target_arch = "xtensa"
        )))]
        {
            &self.0
        }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        #[cfg(any(
            feature = "boxed-memblock",
            target_arch = "wasm32",
            target_arch = "xtensa"
        ))]
        {
            &mut *self.0
        }
        #[cfg(not(any(
            feature = "boxed-memblock",
            target_arch = "wasm32",
            target_arch = "xtensa"
        )))]
        {
            &mut self.0
        }
    }
}

impl<T: Copy + Default, const N: usize> MemBlock<T, N> {
    pub fn new() -> Self {
        Self(new_storage())
    }
}

impl<T: Copy + Default, const N: usize> Default for MemBlock<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Deref for MemBlock<T, N> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<T, const N: usize> DerefMut for MemBlock<T, N> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

#[cfg(any(
    feature = "boxed-memblock",
    target_arch = "wasm32",
    target_arch = "xtensa"
))]
fn new_storage<T: Copy + Default, const N: usize>() -> MemBlockStorage<T, N> {
    Box::new([T::default(); N])
}

#[cfg(not(any(
    feature = "boxed-memblock",
    target_arch = "wasm32",
    target_arch = "xtensa"
)))]
fn new_storage<T: Copy + Default, const N: usize>() -> MemBlockStorage<T, N> {
    [T::default(); N]
}
