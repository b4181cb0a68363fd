//! LLM 프롬프트용 컨텍스트 포매터

use std::fmt::Write;

use super::RankedResult;

/// 검색 결과를 하나의 컨텍스트 블록으로 직렬화
///
/// 결과마다 순서대로 `Title / Content / Source` 블록 하나를 씁니다.
pub fn format_documents(results: &[RankedResult]) -> String {
    let mut context = String::new();
    for result in results {
        // String에 대한 write!는 실패하지 않음
        let _ = write!(
            context,
            "Title: {}\nContent: {}\nSource: {}\n\n",
            result.metadata.title, result.document, result.metadata.url
        );
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Metadata;

    fn result(title: &str, document: &str) -> RankedResult {
        RankedResult {
            relevance: 1.0,
            metadata: Metadata {
                title: title.to_string(),
                url: format!("https://example.com/{}", title),
            },
            document: document.to_string(),
            similarity: 50.0,
            retrieval_rank: 0,
        }
    }

    #[test]
    fn test_empty() {
        assert_eq!(format_documents(&[]), "");
    }

    #[test]
    fn test_single_block() {
        let text = format_documents(&[result("brain", "We use all of it.")]);
        assert_eq!(
            text,
            "Title: brain\nContent: We use all of it.\nSource: https://example.com/brain\n\n"
        );
    }

    #[test]
    fn test_one_block_per_result_in_order() {
        let text = format_documents(&[
            result("first", "one"),
            result("second", "two"),
            result("third", "three"),
        ]);

        assert_eq!(text.matches("Title: ").count(), 3);
        assert_eq!(text.matches("Content: ").count(), 3);
        assert_eq!(text.matches("Source: ").count(), 3);

        let first = text.find("Title: first").unwrap();
        let second = text.find("Title: second").unwrap();
        let third = text.find("Title: third").unwrap();
        assert!(first < second && second < third);
    }
}
