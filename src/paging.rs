//! Paginated enumeration protocol
//!
//! A page source hands out results in strictly sequential batches and says
//! whether more are available. The broker never sees the wire format.

use async_trait::async_trait;

use crate::context::Context;
use crate::error::BrokerError;

#[async_trait]
pub trait PageSource: Send {
    type Item: Send;

    /// False once the last page has been consumed
    fn has_more(&self) -> bool;

    /// Fetch the next page; an exhausted source returns an empty page
    async fn next_page(&mut self, ctx: &Context) -> Result<Vec<Self::Item>, BrokerError>;
}

/// Drain `source` in order, calling `on_item` for each item as it arrives
///
/// Stops at the first error; items of earlier pages are dropped with it.
pub async fn collect_all<P, F>(
    ctx: &Context,
    source: &mut P,
    mut on_item: F,
) -> Result<Vec<P::Item>, BrokerError>
where
    P: PageSource + ?Sized,
    F: FnMut(&P::Item) + Send,
{
    let mut items = Vec::new();
    while source.has_more() {
        let page = source.next_page(ctx).await?;
        for item in &page {
            on_item(item);
        }
        items.extend(page);
    }
    Ok(items)
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedPages;
    use super::*;
    use crate::error::EnumerationError;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_collects_every_item_and_stops() {
        let mut pages = ScriptedPages::new(vec![vec![1, 2, 3], vec![], vec![4], vec![5, 6]]);
        let fetches = pages.fetches.clone();

        let mut seen = Vec::new();
        let items = collect_all(&Context::background(), &mut pages, |i| seen.push(*i))
            .await
            .unwrap();

        assert_eq!(items, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(seen, items);
        assert_eq!(fetches.load(Ordering::SeqCst), 4);
        assert!(!pages.has_more());
    }

    #[tokio::test]
    async fn test_empty_source_is_never_fetched() {
        let mut pages: ScriptedPages<u32> = ScriptedPages::new(vec![]);
        let items = collect_all(&Context::background(), &mut pages, |_| {})
            .await
            .unwrap();

        assert!(items.is_empty());
        assert_eq!(pages.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stops_at_first_failed_page() {
        let mut pages = ScriptedPages::new(vec![vec!["a"], vec!["b"], vec!["c"]]).failing_at(
            1,
            EnumerationError::Status {
                status: 401,
                body: "ExpiredAuthenticationToken".to_string(),
            }
            .into(),
        );

        let mut seen = Vec::new();
        let err = collect_all(&Context::background(), &mut pages, |s| seen.push(*s))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BrokerError::Enumeration(EnumerationError::Status { status: 401, .. })
        ));
        assert_eq!(seen, vec!["a"]);
        assert_eq!(pages.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_enumeration() {
        let mut pages = ScriptedPages::new(vec![vec![1]]);
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();

        let err = collect_all(&ctx, &mut pages, |_| {}).await.unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Enumeration(EnumerationError::Interrupted(_))
        ));
    }
}
