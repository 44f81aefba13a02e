//! Token estimation.
//!
//! Crude approximations, not backend-exact tokenizers:
//!
//! | Component | Used for |
//! |-----------|----------|
//! | [`MultilingualEstimator`] | History trimming budget (CJK ideograph = 2, word = 1) |
//! | [`WordCountEstimator`] | `tokens_used` reported for a generated response |

mod counter;

pub use counter::{
    estimate_tokens, word_count, MultilingualEstimator, TokenCounter, WordCountEstimator,
};
