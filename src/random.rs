/// Small seeded generator for simulated hardware timing (disk seek turns,
/// CPU slice lengths). Injected per component so runs are reproducible from
/// `Config::seed`; no ambient global state.
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn seeded(seed: u64) -> Rng {
        // Mix the seed so small or equal seeds still diverge, and keep the
        // xorshift state nonzero.
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ 0x2545_F491_4F6C_DD1D;
        if state == 0 {
            state = 0x2545_F491_4F6C_DD1D;
        }
        Rng { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform draw from the inclusive range [lo, hi].
    pub fn range(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        lo + self.next_u64() % (hi - lo + 1)
    }
}
