// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

/// Normalize a device name to lowercase alphanumeric ("SDR-IQ" -> "sdriq").
pub fn normalize_name(name: &str) -> String {
    name.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("SDR-IQ"), "sdriq");
        assert_eq!(normalize_name("rtl_tcp"), "rtltcp");
        assert_eq!(normalize_name("Net SDR"), "netsdr");
    }
}
