use crate::error::Result;

/// Observes inner-key membership changes of a structure so that its owner
/// can keep an auxiliary index in the same transaction.
///
/// A structure calls `admit` before it creates or writes anything, so a veto
/// leaves storage untouched. `inserted` records the key once it is written
/// and must tolerate being called again for a key already recorded.
/// `removed` runs after the key is gone.
pub(crate) trait Maintainer {
    fn admit(&self, key: &[u8]) -> Result<()>;

    fn inserted(&self, key: &[u8]) -> Result<()>;

    fn removed(&self, key: &[u8]) -> Result<()>;
}

/// For structures nobody else indexes.
pub(crate) struct Unindexed;

impl Maintainer for Unindexed {
    fn admit(&self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn inserted(&self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    fn removed(&self, _key: &[u8]) -> Result<()> {
        Ok(())
    }
}
