//! Math-typeface classification.
//!
//! LaTeX-typeset PDFs set formulas in Computer Modern math families and the
//! AMS symbol fonts. Body text in the same documents commonly uses other
//! families (`SFRM`, `SFTI`, `SFBX`, …) that share letters with the CM names
//! but never a prefix, so a prefix match on the family name is enough.

/// Family-name prefixes of math typefaces, upper-case.
pub const MATH_FONT_PREFIXES: &[&str] = &[
    "CMMI", "CMSY", "CMEX", "CMR", "CMSS", "MSBM", "EUFM", "MSAM",
];

/// Whether `font_name` belongs to a math typeface family.
///
/// Case-insensitive prefix match against [`MATH_FONT_PREFIXES`].
pub fn is_math_font(font_name: &str) -> bool {
    MATH_FONT_PREFIXES.iter().any(|prefix| {
        font_name
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_fonts_are_detected() {
        for name in [
            "CMMI10", "CMSY8", "CMEX10", "CMR12", "CMSS10", "MSBM10", "EUFM10", "MSAM10", "cmmi7",
            "CmSy5",
        ] {
            assert!(is_math_font(name), "{name} should be a math font");
        }
    }

    #[test]
    fn body_fonts_are_rejected() {
        for name in [
            "SFRM1000",
            "SFTI1000",
            "SFBX1200",
            "Arial",
            "TimesNewRoman",
            "Helvetica",
            "",
            "CM",
        ] {
            assert!(!is_math_font(name), "{name} should not be a math font");
        }
    }

    #[test]
    fn prefix_must_be_at_start() {
        assert!(!is_math_font("XCMMI10"));
        assert!(!is_math_font("Times-CMR"));
    }

    #[test]
    fn non_ascii_names_do_not_panic() {
        assert!(!is_math_font("Ωmega"));
        assert!(!is_math_font("CMα"));
    }
}
