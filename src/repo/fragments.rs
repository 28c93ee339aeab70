//! Fragment mutations

use super::{
    fragments_bucket, index_bucket, load_book, load_linked_fragment, save, versions_bucket, Error,
    Fragment, FragmentView, Repository,
};
use crate::store::{encode_key, FileBackend};
use tracing::debug;

impl<S: FileBackend> Repository<S> {
    /// Insert a fragment at the head (`after == 0`) or right after fragment
    /// `after`. The returned view carries the new 1-based position.
    pub fn add_fragment(&self, bid: u64, after: u64, text: &str) -> Result<FragmentView, Error> {
        let now = self.now();
        let view = self.store.write(|tx| -> Result<_, Error> {
            let mut book = load_book(tx, bid)?;
            let position = if after == 0 {
                0
            } else {
                book.fragments_ids
                    .iter()
                    .position(|&id| id == after)
                    .ok_or(Error::NotFound)?
                    + 1
            };

            let fb = fragments_bucket(bid);
            let fid = tx.next_sequence(&fb)?;
            let fragment = Fragment {
                id: fid,
                created: now,
                updated: now,
                text: text.to_string(),
                ..Fragment::default()
            };
            save(tx, &fb, fid, &fragment)?;

            book.fragments_ids.insert(position, fid);
            book.fragments_total += 1;
            book.last_activity = now;
            save(tx, &index_bucket(), bid, &book)?;

            debug_assert_eq!(
                book.fragments_total as usize,
                book.fragments_ids.len(),
                "Postcondition: fragments_total must match fragments_ids"
            );
            Ok(FragmentView {
                fragment,
                versions: Vec::new(),
                seq_num: position + 1,
            })
        })?;
        debug!(bid, fid = view.fragment.id, seq_num = view.seq_num, "fragment added");
        Ok(view)
    }

    pub fn update_fragment(&self, bid: u64, fid: u64, text: &str) -> Result<(), Error> {
        let now = self.now();
        self.store.write(|tx| -> Result<_, Error> {
            let (mut book, mut fragment) = load_linked_fragment(tx, bid, fid)?;
            fragment.text = text.to_string();
            fragment.updated = now;
            save(tx, &fragments_bucket(bid), fid, &fragment)?;

            book.last_activity = now;
            save(tx, &index_bucket(), bid, &book)
        })
    }

    /// Remove a fragment and its versions; returns the new translated count
    pub fn remove_fragment(&self, bid: u64, fid: u64) -> Result<u64, Error> {
        let now = self.now();
        let translated = self.store.write(|tx| -> Result<_, Error> {
            let (mut book, fragment) = load_linked_fragment(tx, bid, fid)?;

            let vb = versions_bucket(bid);
            for vid in &fragment.versions_ids {
                tx.delete(&vb, &encode_key(*vid))?;
            }
            tx.delete(&fragments_bucket(bid), &encode_key(fid))?;

            book.fragments_ids.retain(|&id| id != fid);
            book.fragments_total = book.fragments_total.saturating_sub(1);
            if fragment.is_translated() {
                book.fragments_translated = book.fragments_translated.saturating_sub(1);
            }
            book.last_activity = now;
            save(tx, &index_bucket(), bid, &book)?;
            Ok(book.fragments_translated)
        })?;
        debug!(bid, fid, "fragment removed");
        Ok(translated)
    }

    /// Mark a fragment; starring a starred fragment writes nothing
    pub fn star_fragment(&self, bid: u64, fid: u64) -> Result<(), Error> {
        self.set_starred(bid, fid, true)
    }

    /// Unmark a fragment; unstarring an unstarred fragment writes nothing
    pub fn unstar_fragment(&self, bid: u64, fid: u64) -> Result<(), Error> {
        self.set_starred(bid, fid, false)
    }

    fn set_starred(&self, bid: u64, fid: u64, starred: bool) -> Result<(), Error> {
        self.store.write(|tx| -> Result<_, Error> {
            let (_, mut fragment) = load_linked_fragment(tx, bid, fid)?;
            if fragment.starred == starred {
                return Ok(());
            }
            fragment.starred = starred;
            save(tx, &fragments_bucket(bid), fid, &fragment)
        })
    }

    /// Set the fragment comment; an empty text clears it
    pub fn comment_fragment(&self, bid: u64, fid: u64, text: &str) -> Result<(), Error> {
        self.store.write(|tx| -> Result<_, Error> {
            let (_, mut fragment) = load_linked_fragment(tx, bid, fid)?;
            fragment.comment = text.to_string();
            save(tx, &fragments_bucket(bid), fid, &fragment)
        })
    }
}
