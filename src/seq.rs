//! See [`Seq`].

use std::{
    cmp::Ordering,
    convert::Infallible,
    ops::{Add, AddAssign, Sub, SubAssign},
};

use octs::{BufTooShortOr, Decode, Encode, FixedEncodeLen, Read, Write};

/// 16-bit sequence number with wraparound-aware comparisons.
///
/// Used both for packet sequence numbers (per channel) and for
/// [`FragmentBuffer`] fragment ids. Because a [`u16`] wraps around fairly
/// quickly at real-world send rates, every comparison between two [`Seq`]s
/// must go through [`Seq::cmp`] / [`Seq::dist_to`] rather than comparing the
/// raw integers.
///
/// The sequence space is visualized as an infinite number line where
/// [`u16::MAX`] sits right before `0`:
///
/// ```text
///     65534  65535    0      1      2
/// ... --|------|------|------|------|-- ...
/// ```
///
/// [Addition](Add) and [subtraction](Sub) always wrap.
///
/// [`FragmentBuffer`]: crate::frag::FragmentBuffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct Seq(pub u16);

impl Seq {
    /// Sequence number with value [`u16::MAX`].
    pub const MAX: Seq = Seq(u16::MAX);

    /// Signed modular distance from `self` to `rhs`, i.e. `rhs - self` taking
    /// wraparound into account. Always returns the shortest path around the
    /// sequence-number circle.
    ///
    /// ```
    /// # use velonet::seq::Seq;
    /// assert_eq!(Seq(0).dist_to(Seq(0)), 0);
    /// assert_eq!(Seq(0).dist_to(Seq(5)), 5);
    /// assert_eq!(Seq(1).dist_to(Seq(0)), -1);
    /// assert_eq!(Seq::MAX.dist_to(Seq(0)), 1);
    /// ```
    #[must_use]
    pub const fn dist_to(self, rhs: Self) -> i16 {
        #[allow(clippy::cast_possible_wrap)]
        (rhs.0.wrapping_sub(self.0) as i16)
    }

    /// Whether `self` is strictly newer than `other` under wraparound-aware
    /// comparison. This is the `seqLess`-equivalent helper called for by the
    /// design notes: all ordering decisions route through here instead of
    /// comparing raw `u16`s.
    #[must_use]
    pub fn is_newer_than(self, other: Self) -> bool {
        other.dist_to(self) > 0
    }
}

impl Ord for Seq {
    /// Wraparound-aware comparison: if the real distance between the two
    /// values is larger than `u16::MAX / 2`, no ordering guarantee is upheld
    /// (a packet "from the future" that far away is indistinguishable from
    /// one that far in the past).
    fn cmp(&self, other: &Self) -> Ordering {
        #[allow(clippy::cast_possible_wrap)]
        (self.0 as i16).wrapping_sub(other.0 as i16).cmp(&0)
    }
}

impl PartialOrd for Seq {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add<Seq> for Seq {
    type Output = Seq;

    fn add(self, rhs: Seq) -> Self::Output {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Seq {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub<Seq> for Seq {
    type Output = Seq;

    fn sub(self, rhs: Seq) -> Self::Output {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Seq {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl FixedEncodeLen for Seq {
    const ENCODE_LEN: usize = u16::ENCODE_LEN;
}

impl Encode for Seq {
    type Error = Infallible;

    fn encode(&self, mut dst: impl Write) -> Result<(), BufTooShortOr<Self::Error>> {
        dst.write(&self.0)
    }
}

impl Decode for Seq {
    type Error = Infallible;

    fn decode(mut src: impl Read) -> Result<Self, BufTooShortOr<Self::Error>> {
        Ok(Self(src.read()?))
    }
}

#[cfg(test)]
mod tests {
    use octs::{Bytes, BytesMut};

    use super::*;

    #[test]
    fn encode_decode() {
        let v = Seq(1234);
        let mut buf = BytesMut::with_capacity(Seq::ENCODE_LEN);
        buf.write(&v).unwrap();
        assert_eq!(Seq::ENCODE_LEN, buf.len());
        let frozen: Bytes = buf.freeze();
        assert_eq!(v, frozen.read::<Seq>().unwrap());
    }

    #[test]
    fn increasing_wraparound() {
        assert!(Seq(0) < Seq(1));
        assert!(Seq(u16::MAX - 1) < Seq(u16::MAX));
        assert!(Seq(u16::MAX) < Seq(0));
        assert!(Seq(u16::MAX) < Seq(1));
    }

    #[test]
    fn is_newer_than() {
        assert!(Seq(1).is_newer_than(Seq(0)));
        assert!(!Seq(0).is_newer_than(Seq(1)));
        assert!(Seq(0).is_newer_than(Seq::MAX));
    }
}
