/// Action to take for an update given local and hub-side disablement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    /// Neither side disabled it; send the update.
    Send,
    /// Re-enabled on the hub; clear the local flag, then send.
    ReEnable,
    /// Disabled on the hub; set the local flag and suppress.
    Disable,
    /// Disabled everywhere we know of; suppress without a registry write.
    Suppress,
}

impl Reconciliation {
    pub fn sends_update(self) -> bool {
        matches!(self, Reconciliation::Send | Reconciliation::ReEnable)
    }
}

/// Combines the local disabled flag with the hub's.
///
/// `remote` is `None` when the hub config is unavailable or does not list
/// the entity; the local flag is trusted as is.
pub fn reconcile(local_disabled: bool, remote_disabled: Option<bool>) -> Reconciliation {
    match (local_disabled, remote_disabled) {
        (true, Some(false)) => Reconciliation::ReEnable,
        (false, Some(true)) => Reconciliation::Disable,
        (true, Some(true)) | (true, None) => Reconciliation::Suppress,
        (false, Some(false)) | (false, None) => Reconciliation::Send,
    }
}
