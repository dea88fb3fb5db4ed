/// Number of replica acknowledgements a primary waits for so that a commit
/// is held by a strict majority of `instances` (the primary included).
///
/// Clusters of zero or one instance need no acknowledgement.
pub fn required_acks(instances: usize) -> usize {
    if instances <= 1 {
        return 0;
    }
    (instances - 1).div_ceil(2)
}
