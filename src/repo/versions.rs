//! Translation versions

use super::{
    dangling, fragments_bucket, index_bucket, load, load_linked_fragment, save, versions_bucket,
    Error, Repository, TranslationVersion,
};
use crate::store::{encode_key, FileBackend};
use tracing::debug;

impl<S: FileBackend> Repository<S> {
    /// Add a version (`vid == 0`) or rewrite version `vid` of the fragment.
    /// Returns the version and the book's new translated count.
    pub fn translate(
        &self,
        bid: u64,
        fid: u64,
        vid: u64,
        text: &str,
    ) -> Result<(TranslationVersion, u64), Error> {
        let now = self.now();
        let out = self.store.write(|tx| -> Result<_, Error> {
            let (mut book, mut fragment) = load_linked_fragment(tx, bid, fid)?;
            let vb = versions_bucket(bid);

            let version = if vid == 0 {
                if !fragment.is_translated() {
                    book.fragments_translated += 1;
                }
                let vid = tx.next_sequence(&vb)?;
                fragment.versions_ids.push(vid);
                save(tx, &fragments_bucket(bid), fid, &fragment)?;
                TranslationVersion {
                    id: vid,
                    created: now,
                    updated: now,
                    text: text.to_string(),
                }
            } else {
                if !fragment.versions_ids.contains(&vid) {
                    return Err(Error::NotFound);
                }
                let existing: TranslationVersion =
                    load(tx, &vb, vid)?.ok_or_else(|| dangling("version", bid, vid))?;
                TranslationVersion {
                    updated: now,
                    text: text.to_string(),
                    ..existing
                }
            };
            save(tx, &vb, version.id, &version)?;

            book.last_activity = now;
            save(tx, &index_bucket(), bid, &book)?;
            Ok((version, book.fragments_translated))
        })?;
        debug!(bid, fid, vid = out.0.id, "translated");
        Ok(out)
    }

    /// Unlink and delete a version; returns the book's new translated count
    pub fn remove_version(&self, bid: u64, fid: u64, vid: u64) -> Result<u64, Error> {
        let now = self.now();
        let translated = self.store.write(|tx| -> Result<_, Error> {
            let (mut book, mut fragment) = load_linked_fragment(tx, bid, fid)?;
            let position = fragment
                .versions_ids
                .iter()
                .position(|&id| id == vid)
                .ok_or(Error::NotFound)?;

            fragment.versions_ids.remove(position);
            save(tx, &fragments_bucket(bid), fid, &fragment)?;
            tx.delete(&versions_bucket(bid), &encode_key(vid))?;

            if !fragment.is_translated() {
                book.fragments_translated = book.fragments_translated.saturating_sub(1);
            }
            book.last_activity = now;
            save(tx, &index_bucket(), bid, &book)?;
            Ok(book.fragments_translated)
        })?;
        debug!(bid, fid, vid, "version removed");
        Ok(translated)
    }
}
