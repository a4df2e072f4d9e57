//! Access control: keys, locks, and permission sets.
//!
//! Every activity carries an access key (a ring and a domain), and every
//! bank carries an access lock of the same shape plus two permission sets.
//! The key selects which permission set applies: the special set when the
//! key has special access to the lock, the general set otherwise.

use std::fmt;

/// Enter, read, and write permissions for a bank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccessPermissions {
    pub enter: bool,
    pub read: bool,
    pub write: bool,
}

impl AccessPermissions {
    #[must_use]
    pub const fn new(enter: bool, read: bool, write: bool) -> Self {
        Self { enter, read, write }
    }

    #[must_use]
    pub const fn all() -> Self {
        Self::new(true, true, true)
    }

    /// Three-bit composite: enter, read, write from the high bit down.
    #[must_use]
    pub const fn composite(&self) -> u64 {
        let mut value = 0;
        if self.enter {
            value |= 0o4;
        }
        if self.read {
            value |= 0o2;
        }
        if self.write {
            value |= 0o1;
        }
        value
    }

    #[must_use]
    pub const fn from_composite(value: u64) -> Self {
        Self {
            enter: value & 0o4 != 0,
            read: value & 0o2 != 0,
            write: value & 0o1 != 0,
        }
    }

    /// Copy with enter permission removed.
    #[must_use]
    pub const fn without_enter(&self) -> Self {
        Self::new(false, self.read, self.write)
    }
}

impl fmt::Display for AccessPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            if self.enter { 'E' } else { '-' },
            if self.read { 'R' } else { '-' },
            if self.write { 'W' } else { '-' },
        )
    }
}

/// An activity's access key: 2-bit ring and 16-bit domain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccessKey {
    ring: u64,
    domain: u64,
}

impl AccessKey {
    #[must_use]
    pub const fn new(ring: u64, domain: u64) -> Self {
        Self {
            ring: ring & 0o3,
            domain: domain & 0o177777,
        }
    }

    /// The master key, ring 0 domain 0, which has special access to every
    /// lock.
    #[must_use]
    pub const fn master() -> Self {
        Self { ring: 0, domain: 0 }
    }

    #[must_use]
    pub const fn ring(&self) -> u64 {
        self.ring
    }

    #[must_use]
    pub const fn domain(&self) -> u64 {
        self.domain
    }

    /// 18-bit composite: ring above domain.
    #[must_use]
    pub const fn composite(&self) -> u64 {
        (self.ring << 16) | self.domain
    }

    #[must_use]
    pub const fn from_composite(value: u64) -> Self {
        Self::new(value >> 16, value & 0o177777)
    }

    #[must_use]
    pub const fn is_master(&self) -> bool {
        self.ring == 0 && self.domain == 0
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:06o}", self.ring, self.domain)
    }
}

/// A bank's access lock, the same shape as a key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccessLock {
    ring: u64,
    domain: u64,
}

impl AccessLock {
    #[must_use]
    pub const fn new(ring: u64, domain: u64) -> Self {
        Self {
            ring: ring & 0o3,
            domain: domain & 0o177777,
        }
    }

    #[must_use]
    pub const fn ring(&self) -> u64 {
        self.ring
    }

    #[must_use]
    pub const fn domain(&self) -> u64 {
        self.domain
    }

    /// 18-bit composite: ring above domain.
    #[must_use]
    pub const fn composite(&self) -> u64 {
        (self.ring << 16) | self.domain
    }

    #[must_use]
    pub const fn from_composite(value: u64) -> Self {
        Self::new(value >> 16, value & 0o177777)
    }

    /// A key has special access when it is the master key, or when it sits
    /// in a more privileged ring within the same domain.
    #[must_use]
    pub const fn grants_special_access(&self, key: &AccessKey) -> bool {
        key.is_master() || (key.ring() < self.ring && key.domain() == self.domain)
    }

    /// Selects the applicable permission set for `key`.
    #[must_use]
    pub const fn effective_permissions(
        &self,
        key: &AccessKey,
        special: AccessPermissions,
        general: AccessPermissions,
    ) -> AccessPermissions {
        if self.grants_special_access(key) {
            special
        } else {
            general
        }
    }
}

impl fmt::Display for AccessLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:06o}", self.ring, self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn master_key_has_special_access_everywhere() {
        let lock = AccessLock::new(3, 0o54321);
        assert!(lock.grants_special_access(&AccessKey::master()));
    }

    #[rstest]
    #[case(1, 0o100, 2, 0o100, true)] // lower ring, same domain
    #[case(2, 0o100, 2, 0o100, false)] // equal ring
    #[case(3, 0o100, 2, 0o100, false)] // higher ring
    #[case(1, 0o101, 2, 0o100, false)] // different domain
    fn special_access_requires_lower_ring_same_domain(
        #[case] key_ring: u64,
        #[case] key_domain: u64,
        #[case] lock_ring: u64,
        #[case] lock_domain: u64,
        #[case] expected: bool,
    ) {
        let key = AccessKey::new(key_ring, key_domain);
        let lock = AccessLock::new(lock_ring, lock_domain);
        assert_eq!(lock.grants_special_access(&key), expected);
    }

    #[test]
    fn effective_permissions_selects_set() {
        let special = AccessPermissions::new(true, true, true);
        let general = AccessPermissions::new(false, true, false);
        let lock = AccessLock::new(2, 0o100);

        let privileged = AccessKey::new(1, 0o100);
        assert_eq!(
            lock.effective_permissions(&privileged, special, general),
            special
        );

        let ordinary = AccessKey::new(3, 0o200);
        assert_eq!(
            lock.effective_permissions(&ordinary, special, general),
            general
        );
    }

    #[test]
    fn composite_round_trip() {
        let key = AccessKey::new(2, 0o123456);
        assert_eq!(AccessKey::from_composite(key.composite()), key);
        let lock = AccessLock::new(3, 0o054321);
        assert_eq!(AccessLock::from_composite(lock.composite()), lock);
    }

    #[test]
    fn permissions_composite_and_display() {
        let perms = AccessPermissions::new(true, true, false);
        assert_eq!(perms.composite(), 0o6);
        assert_eq!(AccessPermissions::from_composite(0o6), perms);
        assert_eq!(perms.to_string(), "ER-");
        assert_eq!(perms.without_enter().composite(), 0o2);
    }
}
