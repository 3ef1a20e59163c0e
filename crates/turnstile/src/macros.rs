//! Macros for reducing subscription boilerplate.

/// Builds the `Vec<serde_json::Value>` of bound arguments for
/// `subscribe` / `append_to_complex_sequential`.
///
/// Each argument is converted with `serde_json::json!`, so literals, variables
/// and nested JSON all work.
///
/// # Example
///
/// ```
/// use turnstile_core::args;
///
/// let none = args![];
/// assert!(none.is_empty());
///
/// let bound = args![3, "north", { "retries": 2 }];
/// assert_eq!(bound.len(), 3);
/// assert_eq!(bound[1], "north");
/// assert_eq!(bound[2]["retries"], 2);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::__private::serde_json::Value>::new()
    };
    ($($arg:tt),+ $(,)?) => {
        ::std::vec![$($crate::__private::serde_json::json!($arg)),+]
    };
}
