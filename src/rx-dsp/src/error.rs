// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DspError {
    /// Rates or bandwidths that no pipeline can be built for.
    #[error("dsp configuration: {0}")]
    Configuration(String),
}
