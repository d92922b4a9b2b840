//! Command parameter types exposed by the page driver interface.
//!
//! Locators are resolved inside the page: every locator compiles to a
//! JavaScript expression yielding an array of elements, and driver commands
//! wrap that array with a small body (count it, read the nth entry, ...).

use serde::{Deserialize, Serialize};

/// Declarative description of a set of elements on the page.
///
/// Text matching (placeholder, accessible name, text content) is
/// whitespace-normalized, case-insensitive and substring based.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// Plain CSS selector.
    Css { selector: String },
    /// Form controls whose `placeholder` attribute matches.
    Placeholder { text: String },
    /// Elements with an implicit or explicit ARIA role and a matching name.
    /// With `exact`, the whitespace-normalized name must equal `name`
    /// case-sensitively instead of containing it.
    Role {
        role: String,
        name: String,
        #[serde(default)]
        exact: bool,
    },
    /// The innermost elements whose text content matches.
    Text { text: String },
    /// For every `anchor` element, the first `css` match beneath its
    /// `up`-th ancestor. Anchors without a match stay in the list as holes
    /// so positions line up with the anchor list.
    Related {
        anchor: Box<Locator>,
        up: usize,
        css: String,
    },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css {
            selector: selector.into(),
        }
    }

    pub fn placeholder(text: impl Into<String>) -> Self {
        Locator::Placeholder { text: text.into() }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Locator::Role {
            role: role.into(),
            name: name.into(),
            exact: false,
        }
    }

    pub fn role_exact(role: impl Into<String>, name: impl Into<String>) -> Self {
        Locator::Role {
            role: role.into(),
            name: name.into(),
            exact: true,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Locator::Text { text: text.into() }
    }

    pub fn related(anchor: Locator, up: usize, css: impl Into<String>) -> Self {
        Locator::Related {
            anchor: Box::new(anchor),
            up,
            css: css.into(),
        }
    }

    /// Short human-readable form used in logs and error hints.
    pub fn describe(&self) -> String {
        match self {
            Locator::Css { selector } => format!("css={selector}"),
            Locator::Placeholder { text } => format!("placeholder={text:?}"),
            Locator::Role { role, name, exact } => {
                let op = if *exact { "=" } else { "~=" };
                format!("role={role}[name{op}{name:?}]")
            }
            Locator::Text { text } => format!("text={text:?}"),
            Locator::Related { anchor, up, css } => {
                format!("{} >> ancestor({up}) >> {css}", anchor.describe())
            }
        }
    }

    /// JavaScript expression evaluating to `Array<Element | null>`.
    ///
    /// The expression may reference `norm`, `squash` and `accessibleName`,
    /// which [`Locator::script`] defines.
    pub fn elements_js(&self) -> String {
        match self {
            Locator::Css { selector } => format!(
                "(() => {{ try {{ return Array.from(document.querySelectorAll({sel})); }} catch (err) {{ return []; }} }})()",
                sel = js_string(selector)
            ),
            Locator::Placeholder { text } => format!(
                "Array.from(document.querySelectorAll('[placeholder]')).filter((el) => norm(el.getAttribute('placeholder')).includes(norm({text})))",
                text = js_string(text)
            ),
            Locator::Role { role, name, exact } => {
                let test = if *exact {
                    format!("squash(accessibleName(el)) === squash({})", js_string(name))
                } else {
                    format!("norm(accessibleName(el)).includes(norm({}))", js_string(name))
                };
                format!(
                    "Array.from(document.querySelectorAll({sel})).filter((el) => {test})",
                    sel = js_string(&role_selector(role)),
                )
            }
            Locator::Text { text } => format!(
                "Array.from(document.body ? document.body.querySelectorAll('*') : []).filter((el) => {{\n      if (['SCRIPT', 'STYLE', 'NOSCRIPT', 'TEMPLATE'].includes(el.tagName)) {{ return false; }}\n      const needle = norm({text});\n      if (!norm(el.textContent).includes(needle)) {{ return false; }}\n      return !Array.from(el.children).some((child) => norm(child.textContent).includes(needle));\n    }})",
                text = js_string(text)
            ),
            Locator::Related { anchor, up, css } => format!(
                "({anchor}).map((el) => {{\n      let node = el;\n      for (let i = 0; i < {up} && node; i += 1) {{ node = node.parentElement; }}\n      if (!node) {{ return null; }}\n      try {{ return node.querySelector({css}); }} catch (err) {{ return null; }}\n    }})",
                anchor = anchor.elements_js(),
                up = up,
                css = js_string(css)
            ),
        }
    }

    /// Wraps `body` in a self-contained function with `elements` in scope.
    pub fn script(&self, body: &str) -> String {
        format!(
            "(() => {{\n  const squash = (value) => String(value ?? '').replace(/\\s+/g, ' ').trim();\n  const norm = (value) => squash(value).toLowerCase();\n  const accessibleName = (el) => el.getAttribute('aria-label') || el.innerText || el.value || el.getAttribute('title');\n  const elements = {elements};\n  {body}\n}})()",
            elements = self.elements_js(),
            body = body
        )
    }

    pub fn count_script(&self) -> String {
        self.script("return elements.filter(Boolean).length;")
    }

    /// Resolves the element at `index` to the viewport point a click should land on.
    pub fn anchor_script(&self, index: usize) -> String {
        self.script(&format!(
            "const el = elements[{index}];\n  if (!el) {{ return null; }}\n  el.scrollIntoView({{ block: 'center', inline: 'center' }});\n  const rect = el.getBoundingClientRect();\n  return {{ x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 }};"
        ))
    }

    pub fn inner_text_script(&self, index: usize) -> String {
        self.script(&format!(
            "const el = elements[{index}];\n  if (!el) {{ return null; }}\n  return el.innerText ?? el.textContent ?? '';"
        ))
    }

    pub fn attribute_script(&self, index: usize, name: &str) -> String {
        self.script(&format!(
            "const el = elements[{index}];\n  if (!el) {{ return {{ found: false, value: null }}; }}\n  return {{ found: true, value: el.getAttribute({name}) }};",
            name = js_string(name)
        ))
    }

    /// Focuses the first match and clears its value through the native
    /// setter so framework-controlled inputs observe the change.
    pub fn prepare_fill_script(&self) -> String {
        self.script(
            "const el = elements.find(Boolean);\n  if (!el) { return false; }\n  el.focus();\n  const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;\n  const descriptor = Object.getOwnPropertyDescriptor(proto, 'value');\n  if (descriptor && descriptor.set && (el instanceof HTMLInputElement || el instanceof HTMLTextAreaElement)) { descriptor.set.call(el, ''); } else { el.value = ''; }\n  el.dispatchEvent(new Event('input', { bubbles: true }));\n  return true;",
        )
    }
}

/// Viewport coordinates of an element's center.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub x: f64,
    pub y: f64,
}

/// Result of an attribute lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeProbe {
    pub found: bool,
    pub value: Option<String>,
}

fn role_selector(role: &str) -> String {
    match role {
        "button" => "button, input[type=button], input[type=submit], input[type=reset], [role=\"button\"]"
            .to_string(),
        "link" => "a[href], [role=\"link\"]".to_string(),
        "textbox" => {
            "input:not([type]), input[type=text], input[type=search], input[type=email], textarea, [role=\"textbox\"]"
                .to_string()
        }
        "checkbox" => "input[type=checkbox], [role=\"checkbox\"]".to_string(),
        other => format!("[role=\"{}\"]", other.replace('"', "")),
    }
}

fn js_string(value: &str) -> String {
    // serde_json string literals are valid JavaScript string literals.
    serde_json::Value::String(value.to_string()).to_string()
}
