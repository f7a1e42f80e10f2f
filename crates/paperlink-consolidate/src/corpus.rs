//! In-memory paper set keyed by paper hash

use paperlink_core::{PaperHash, PaperRecord, merge_papers, paper_hash};
use rustc_hash::FxHashMap;

/// Papers in input order with O(1) lookup by hash. Hashes are unique.
#[derive(Debug, Default)]
pub struct Corpus {
    papers: Vec<PaperRecord>,
    hashes: Vec<PaperHash>,
    index: FxHashMap<PaperHash, usize>,
}

impl Corpus {
    /// Build from raw records, collapsing records with the same hash into the
    /// first occurrence. Identifiers are normalized and input abstracts are
    /// recorded as original provenance. Returns the corpus and the number of
    /// duplicates collapsed.
    pub fn from_papers(papers: Vec<PaperRecord>) -> (Self, usize) {
        let mut corpus = Self::default();
        let mut duplicates = 0;
        for mut paper in papers {
            paper.seed_original_provenance();
            paper.external_ids = std::mem::take(&mut paper.external_ids).normalized();
            let hash = paper_hash(&paper);
            match corpus.index.get(&hash) {
                Some(&i) => {
                    merge_papers(&mut corpus.papers[i], &paper);
                    duplicates += 1;
                }
                None => corpus.push(hash, paper),
            }
        }
        if duplicates > 0 {
            log::info!("collapsed {duplicates} duplicate record(s) by paper hash");
        }
        (corpus, duplicates)
    }

    /// Rebuild from checkpointed papers, filling gaps from the input file.
    ///
    /// Input order is kept. A saved copy replaces its input record; saved
    /// papers absent from the input are appended. Returns the corpus and how
    /// many papers had to be taken from the input.
    pub fn restore(input: Vec<PaperRecord>, saved: Vec<PaperRecord>) -> (Self, usize) {
        let (saved, _) = Self::from_papers(saved);
        let Corpus {
            papers: saved_papers,
            hashes: saved_hashes,
            index: saved_index,
        } = saved;
        let mut slots: Vec<Option<PaperRecord>> = saved_papers.into_iter().map(Some).collect();

        let (input, _) = Self::from_papers(input);
        let mut corpus = Self::default();
        let mut from_input = 0;
        for (hash, paper) in input.hashes.into_iter().zip(input.papers) {
            let saved = saved_index.get(&hash).and_then(|&i| slots[i].take());
            match saved {
                Some(saved) => corpus.push(hash, saved),
                None => {
                    from_input += 1;
                    corpus.push(hash, paper);
                }
            }
        }
        for (hash, slot) in saved_hashes.into_iter().zip(slots) {
            if let Some(paper) = slot {
                corpus.push(hash, paper);
            }
        }
        (corpus, from_input)
    }

    fn push(&mut self, hash: PaperHash, paper: PaperRecord) {
        self.index.insert(hash.clone(), self.papers.len());
        self.hashes.push(hash);
        self.papers.push(paper);
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.papers.is_empty()
    }

    pub fn papers(&self) -> &[PaperRecord] {
        &self.papers
    }

    pub fn into_papers(self) -> Vec<PaperRecord> {
        self.papers
    }

    pub fn get_mut(&mut self, hash: &PaperHash) -> Option<&mut PaperRecord> {
        let i = *self.index.get(hash)?;
        self.papers.get_mut(i)
    }

    /// `(hash, paper)` pairs in corpus order.
    pub fn iter(&self) -> impl Iterator<Item = (&PaperHash, &PaperRecord)> {
        self.hashes.iter().zip(&self.papers)
    }
}
