//! Photon detection channels.
//!
//! TCSPC hardware routes photons to up to four detection channels, numbered
//! 1..=4 on the wire. `Channel` replaces the raw `chan - 1` indexing with a
//! bounds-checked enum, and [`PerChannel`] is the fixed four-slot container
//! used for per-channel outputs.

use std::ops::{Index, IndexMut};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One of the four photon detection channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Channel {
    Ch1,
    Ch2,
    Ch3,
    Ch4,
}

impl Channel {
    /// All channels, in wire order.
    pub const ALL: [Channel; 4] = [Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4];

    /// Maps a 1-based wire channel number to a channel.
    ///
    /// Record streams may legally carry higher channel numbers (hardware
    /// reserves up to 14 on PicoHarp and 64 on the newer devices); those
    /// return `None` and are simply never imaged.
    #[inline]
    #[must_use]
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Channel::Ch1),
            2 => Some(Channel::Ch2),
            3 => Some(Channel::Ch3),
            4 => Some(Channel::Ch4),
            _ => None,
        }
    }

    /// The 1-based wire channel number.
    #[inline]
    #[must_use]
    pub fn number(self) -> u8 {
        self as u8 + 1
    }

    /// Zero-based slot index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A value per detection channel, indexed by [`Channel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PerChannel<T>(pub [T; 4]);

impl<T> PerChannel<T> {
    /// Builds a container by evaluating `f` for every channel.
    pub fn from_fn(mut f: impl FnMut(Channel) -> T) -> Self {
        Self(Channel::ALL.map(&mut f))
    }

    /// Iterates `(channel, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (Channel, &T)> {
        Channel::ALL.iter().copied().zip(self.0.iter())
    }

    /// Iterates `(channel, value)` pairs mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Channel, &mut T)> {
        Channel::ALL.iter().copied().zip(self.0.iter_mut())
    }
}

impl<T> Index<Channel> for PerChannel<T> {
    type Output = T;

    #[inline]
    fn index(&self, ch: Channel) -> &T {
        &self.0[ch.index()]
    }
}

impl<T> IndexMut<Channel> for PerChannel<T> {
    #[inline]
    fn index_mut(&mut self, ch: Channel) -> &mut T {
        &mut self.0[ch.index()]
    }
}
