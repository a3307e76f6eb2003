/// generates a `Context` trait bound to the given error type so each crate
/// can attach context to foreign results without orphan rule issues
#[macro_export]
macro_rules! context_trait {
    ($e:path) => {
        pub trait Context<T, E> {
            fn context<C>(self, cxt: C) -> std::result::Result<T, $e>
            where
                C: Into<String>;
        }
    };
}
