//! Checksum policies
//!
//! A policy decides which checksum value is authoritative for a resource and
//! whether a received binary is acceptable given the checksums its origin
//! declared. The policy is fixed per repository at configuration time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checksum::{ChecksumType, ChecksumsInfo};
use crate::path::RepoPath;

/// Checksum policy variants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumPolicyType {
    /// The computed checksum must match the declared one; no declared value is a failure
    Strict,

    /// Trust the computed checksum when the origin declared none, otherwise require a match
    #[default]
    GenerateIfAbsent,

    /// Always trust the computed checksum
    PassThru,
}

/// Raised when a received binary fails checksum reconciliation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Checksum mismatch for {path} ({checksum_type}): expected {expected}, got {actual}")]
pub struct ChecksumMismatch {
    pub path: String,
    pub checksum_type: ChecksumType,
    pub expected: String,
    pub actual: String,
}

/// Checksum policy bound to a repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChecksumPolicy {
    policy_type: ChecksumPolicyType,
}

impl ChecksumPolicy {
    pub fn new(policy_type: ChecksumPolicyType) -> Self {
        Self { policy_type }
    }

    pub fn policy_type(&self) -> ChecksumPolicyType {
        self.policy_type
    }

    /// Authoritative value to serve for `checksum_type`
    ///
    /// Returns `None` when the policy refuses to vouch for any value (for
    /// instance a strict policy facing a missing or mismatching original).
    pub fn select(
        &self,
        checksum_type: ChecksumType,
        checksums: &ChecksumsInfo,
        _repo_path: &RepoPath,
    ) -> Option<String> {
        let info = checksums.get(checksum_type)?;
        let actual = info.actual.as_deref()?;
        if self.reconcile(info.original.as_deref(), actual) {
            match self.policy_type {
                ChecksumPolicyType::PassThru => Some(actual.to_string()),
                _ => Some(info.original.clone().unwrap_or_else(|| actual.to_string())),
            }
        } else {
            None
        }
    }

    /// Whether `actual` is acceptable given the declared `expected` value
    pub fn reconcile(&self, expected: Option<&str>, actual: &str) -> bool {
        match self.policy_type {
            ChecksumPolicyType::PassThru => true,
            ChecksumPolicyType::GenerateIfAbsent => match expected {
                None => true,
                Some(expected) => expected.eq_ignore_ascii_case(actual),
            },
            ChecksumPolicyType::Strict => match expected {
                None => false,
                Some(expected) => expected.eq_ignore_ascii_case(actual),
            },
        }
    }

    /// Verify a received binary against its declared checksums
    ///
    /// Only the types we computed are checked. A strict policy additionally
    /// requires the origin to have declared at least the SHA-1 or MD5 value.
    pub fn verify(&self, checksums: &ChecksumsInfo, repo_path: &RepoPath) -> Result<(), ChecksumMismatch> {
        if self.policy_type == ChecksumPolicyType::PassThru {
            return Ok(());
        }

        if self.policy_type == ChecksumPolicyType::Strict
            && checksums.original(ChecksumType::Sha1).is_none()
            && checksums.original(ChecksumType::Md5).is_none()
        {
            let actual = checksums.actual(ChecksumType::Sha1).unwrap_or_default();
            return Err(ChecksumMismatch {
                path: repo_path.to_string(),
                checksum_type: ChecksumType::Sha1,
                expected: "<none>".to_string(),
                actual: actual.to_string(),
            });
        }

        for info in checksums.iter() {
            let Some(actual) = info.actual.as_deref() else {
                continue;
            };
            if info.original.is_none() && self.policy_type == ChecksumPolicyType::Strict {
                // Strict only demands the declared ones to match
                continue;
            }
            if !self.reconcile(info.original.as_deref(), actual) {
                return Err(ChecksumMismatch {
                    path: repo_path.to_string(),
                    checksum_type: info.checksum_type,
                    expected: info.original.clone().unwrap_or_default(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl From<ChecksumPolicyType> for ChecksumPolicy {
    fn from(policy_type: ChecksumPolicyType) -> Self {
        Self::new(policy_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{ChecksumInfo, ComputedChecksums};

    fn path() -> RepoPath {
        RepoPath::new("central-cache", "org/acme/lib/1.0/lib-1.0.jar")
    }

    fn checksums(original_sha1: Option<&str>) -> ChecksumsInfo {
        let computed = ComputedChecksums::of(b"content");
        let mut info = ChecksumsInfo::new();
        info.insert(ChecksumInfo::new(
            ChecksumType::Sha1,
            original_sha1.map(String::from),
            Some(computed.sha1.clone()),
        ));
        info.insert(ChecksumInfo::new(ChecksumType::Md5, None, Some(computed.md5)));
        info
    }

    fn good_sha1() -> String {
        ComputedChecksums::of(b"content").sha1
    }

    #[test]
    fn test_strict_rejects_mismatch() {
        let policy = ChecksumPolicy::new(ChecksumPolicyType::Strict);
        let bad = "0000000000000000000000000000000000000000";
        let err = policy.verify(&checksums(Some(bad)), &path()).unwrap_err();
        assert_eq!(err.checksum_type, ChecksumType::Sha1);
        assert_eq!(err.expected, bad);
        assert!(policy.select(ChecksumType::Sha1, &checksums(Some(bad)), &path()).is_none());
    }

    #[test]
    fn test_strict_requires_original() {
        let policy = ChecksumPolicy::new(ChecksumPolicyType::Strict);
        assert!(policy.verify(&checksums(None), &path()).is_err());
        assert!(policy.verify(&checksums(Some(&good_sha1())), &path()).is_ok());
        assert!(!policy.reconcile(None, "abc"));
    }

    #[test]
    fn test_generate_if_absent() {
        let policy = ChecksumPolicy::new(ChecksumPolicyType::GenerateIfAbsent);
        assert!(policy.verify(&checksums(None), &path()).is_ok());
        assert_eq!(
            policy.select(ChecksumType::Sha1, &checksums(None), &path()),
            Some(good_sha1())
        );

        let bad = "1111111111111111111111111111111111111111";
        assert!(policy.verify(&checksums(Some(bad)), &path()).is_err());
    }

    #[test]
    fn test_pass_thru_trusts_actual() {
        let policy = ChecksumPolicy::new(ChecksumPolicyType::PassThru);
        let bad = "2222222222222222222222222222222222222222";
        assert!(policy.verify(&checksums(Some(bad)), &path()).is_ok());
        assert_eq!(
            policy.select(ChecksumType::Sha1, &checksums(Some(bad)), &path()),
            Some(good_sha1())
        );
    }

    #[test]
    fn test_reconcile_is_case_insensitive() {
        let policy = ChecksumPolicy::default();
        assert!(policy.reconcile(Some("ABCDEF"), "abcdef"));
    }

    #[test]
    fn test_policy_type_serde() {
        let t: ChecksumPolicyType = serde_json::from_str("\"generate-if-absent\"").unwrap();
        assert_eq!(t, ChecksumPolicyType::GenerateIfAbsent);
        let t: ChecksumPolicyType = serde_json::from_str("\"pass-thru\"").unwrap();
        assert_eq!(t, ChecksumPolicyType::PassThru);
    }
}
