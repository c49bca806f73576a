/// Run `f` out of line, marked `#[cold]`. For the tracer's failure paths,
/// which sit next to every heap call.
#[cold]
#[inline(never)]
pub(crate) fn cold<R, F>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}
