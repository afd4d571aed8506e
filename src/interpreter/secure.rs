//! Zeroizable text handle backing `shadow` values.

use std::fmt;
use std::sync::atomic::{compiler_fence, Ordering};

use parking_lot::Mutex;

/// Protected text. The bytes are overwritten on `clear` and on drop; every
/// clone of the owning `Arc` observes the cleared state.
pub struct SecureString {
    bytes: Mutex<Vec<u8>>,
}

impl SecureString {
    pub fn from_plain(text: &str) -> Self {
        Self::from_bytes(text.as_bytes().to_vec())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(bytes),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Plain text copy. Invalid UTF-8 is replaced, never rejected.
    pub fn reveal(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut bytes = self.bytes.lock();
        for byte in bytes.iter_mut() {
            *byte = 0;
        }
        compiler_fence(Ordering::SeqCst);
        bytes.clear();
    }

    /// Length-revealing, content-constant-time comparison.
    pub fn constant_time_eq(&self, other: &SecureString) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let left = self.bytes.lock();
        let right = other.bytes.lock();
        if left.len() != right.len() {
            return false;
        }
        left.iter()
            .zip(right.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Drop for SecureString {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString(len={})", self.len())
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureString(len={})", self.len())
    }
}
