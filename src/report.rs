/// Per-stage counts, returned after every loop completes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

impl RunStats {
    pub fn record<T, E>(&mut self, outcome: &Result<T, E>) {
        self.total += 1;
        match outcome {
            Ok(_) => self.ok += 1,
            Err(_) => self.errors += 1,
        }
    }

    pub fn print(&self, label: &str) {
        println!("{}: {} processed ({} ok, {} errors).", label, self.total, self.ok, self.errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_splits_ok_and_errors() {
        let mut stats = RunStats::default();
        stats.record::<(), &str>(&Ok(()));
        stats.record::<(), &str>(&Err("x"));
        stats.record::<(), &str>(&Ok(()));
        assert_eq!(stats, RunStats { total: 3, ok: 2, errors: 1 });
    }
}
