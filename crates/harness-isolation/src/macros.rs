/// Declare `#[test]` functions whose bodies run in an isolated worker
/// process.
///
/// The test name handed to the runner is the libtest path of the generated
/// function, so the re-exec strategy can find it again. A body with a
/// declared return type (`-> Result<(), E>`) fails the test on `Err`.
#[macro_export]
macro_rules! isolated_test {
    () => {};
    ($(#[$meta:meta])* fn $name:ident() -> $ret:ty $body:block $($rest:tt)*) => {
        $(#[$meta])*
        #[test]
        fn $name() -> ::std::result::Result<(), $crate::HarnessError> {
            $crate::IsolatedTest::new($crate::test_path(module_path!(), stringify!($name)))
                .run_and_assert_returning(|| -> $ret { $body })
        }
        $crate::isolated_test! { $($rest)* }
    };
    ($(#[$meta:meta])* fn $name:ident() $body:block $($rest:tt)*) => {
        $(#[$meta])*
        #[test]
        fn $name() -> ::std::result::Result<(), $crate::HarnessError> {
            $crate::IsolatedTest::new($crate::test_path(module_path!(), stringify!($name)))
                .run_and_assert(|| $body)
        }
        $crate::isolated_test! { $($rest)* }
    };
}
