pub fn build_extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"Extract knowledge triples (entity, relation, entity) from the following lecture text.

INSTRUCTIONS:
1. Identify the key concepts, methods, models and terms in the text
2. Express each fact as a directed triple: head entity, relation, tail entity
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "triples": [
    {{"head": "Entity1", "relation": "relation", "tail": "Entity2"}}
  ]
}}

EXAMPLE:
Text: "A convolutional neural network uses convolution layers for feature extraction."
Output: {{"triples": [{{"head": "Convolutional Neural Network", "relation": "uses", "tail": "Convolution Layer"}}, {{"head": "Convolution Layer", "relation": "used_for", "tail": "Feature Extraction"}}]}}

RULES:
- Entities are short noun phrases taken from the text, in the text's language
- Relations are short verbs or verb phrases: "uses", "prevents", "related_to", "part_of", etc.
- Extract 2-10 triples
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{}

JSON OUTPUT:"#,
        chunk_text
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. It must be an object with a "triples" array of {{"head", "relation", "tail"}} objects. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}
