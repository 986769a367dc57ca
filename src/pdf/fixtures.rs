use lopdf::{Document, Object, Stream, dictionary};

/// Letter-size template whose pages each carry a caption, a horizontal
/// rule at y=600 and a 12pt box at (72, 500).
pub fn template_pdf(pages: usize) -> Vec<u8> {
    sized_template_pdf(pages, 612, 792)
}

pub fn sized_template_pdf(pages: usize, width: i64, height: i64) -> Vec<u8> {
    let contents = (0..pages)
        .map(|index| {
            format!(
                "BT /F1 12 Tf 72 720 Td (Page {}) Tj ET\n0.5 w 72 600 m 300 600 l S\n72 500 12 12 re S\n",
                index + 1
            )
        })
        .collect::<Vec<_>>();
    pdf_with_pages(&contents, width, height)
}

/// One letter page with labelled regions: a rule beside "Legal Name:", a
/// box under "Subscription Amount", a rule beside "Signature" and an
/// unlabelled checkbox far from any text.
pub fn labelled_template_pdf() -> Vec<u8> {
    let content = [
        "BT /F1 10 Tf 72 604 Td (Legal Name:) Tj ET",
        "0.5 w 150 600 m 400 600 l S",
        "BT /F1 10 Tf 150 504 Td [(Subscription) -250 (Amount)] TJ ET",
        "150 480 200 20 re S",
        "BT /F1 10 Tf 1 0 0 1 90 303 Tm (Signature) Tj ET",
        "150 300 m 350 300 l S",
        "500 100 12 12 re S",
    ]
    .join("\n");
    pdf_with_pages(&[content], 612, 792)
}

pub fn pdf_with_pages(contents: &[String], width: i64, height: i64) -> Vec<u8> {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });

    let mut kids = Vec::new();
    for content in contents {
        let content_id =
            document.add_object(Stream::new(dictionary! {}, content.clone().into_bytes()));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => contents.len() as i64,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).expect("serialize test pdf");
    bytes
}
