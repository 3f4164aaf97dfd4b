use crate::documents::DocumentGroups;
use crate::render::render_document;

/// Flatten grouped documents into the searchable text layout:
///
/// ```text
/// Collection: <name>
/// <one rendered document per line>
///
/// ```
///
/// Groups appear in first-seen order, documents in decode order.
pub fn project_text(groups: &DocumentGroups) -> String {
    let mut text = String::new();

    for (name, documents) in groups.iter() {
        text.push_str("Collection: ");
        text.push_str(name);
        text.push('\n');
        for doc in documents {
            text.push_str(&render_document(doc));
            text.push('\n');
        }
        text.push('\n');
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::group_documents;
    use bson::doc;

    #[test]
    fn test_layout() {
        let groups = group_documents(vec![
            doc! { "_type": "device", "name": "ap-1" },
            doc! { "key": "mgmt" },
            doc! { "_type": "device", "name": "ap-2" },
        ]);

        let expected = concat!(
            "Collection: device\n",
            "{ \"_type\" : \"device\", \"name\" : \"ap-1\" }\n",
            "{ \"_type\" : \"device\", \"name\" : \"ap-2\" }\n",
            "\n",
            "Collection: unclassified\n",
            "{ \"key\" : \"mgmt\" }\n",
            "\n",
        );
        assert_eq!(project_text(&groups), expected);
    }

    #[test]
    fn test_empty_groups_project_to_empty_text() {
        assert_eq!(project_text(&DocumentGroups::default()), "");
    }

    #[test]
    fn test_one_line_per_document() {
        let docs: Vec<_> = (0..10).map(|i| doc! { "_type": "t", "i": i }).collect();
        let text = project_text(&group_documents(docs));

        let body = text.lines().filter(|l| l.starts_with('{')).count();
        assert_eq!(body, 10);
    }
}
